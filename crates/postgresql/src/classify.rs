//! Mapping PostgreSQL errors onto [`ErrorKind`].

use pgworkload_engine::{DbError, ErrorKind};
use std::error::Error as _;

/// `undefined_table`
const UNDEFINED_TABLE: &str = "42P01";
/// `invalid_schema_name`
const INVALID_SCHEMA_NAME: &str = "3F000";
/// `serialization_failure`
const SERIALIZATION_FAILURE: &str = "40001";

/// Classify a SQLSTATE code.
///
/// Class 08 (connection exception) and class 57 (operator intervention,
/// which covers admin shutdowns and cancelled statements) are transient;
/// everything not listed is fatal.
pub fn classify_sqlstate(code: &str) -> ErrorKind {
    match code {
        UNDEFINED_TABLE | INVALID_SCHEMA_NAME => ErrorKind::SchemaMissing,
        SERIALIZATION_FAILURE => ErrorKind::Serialization,
        _ if code.starts_with("08") || code.starts_with("57") => ErrorKind::Connectivity,
        _ => ErrorKind::Other,
    }
}

pub fn classify(err: &tokio_postgres::Error) -> ErrorKind {
    if let Some(state) = err.code() {
        return classify_sqlstate(state.code());
    }
    if err.is_closed() {
        return ErrorKind::Connectivity;
    }
    match err.source() {
        None => ErrorKind::Connectivity,
        Some(source) if source.is::<std::io::Error>() => ErrorKind::Connectivity,
        Some(_) => ErrorKind::Other,
    }
}

/// Convert a driver error, keeping the server message when there is one.
pub fn to_db_error(err: tokio_postgres::Error) -> DbError {
    let kind = classify(&err);
    let message = match err.as_db_error() {
        Some(db) => format!("{} ({})", db.message(), db.code().code()),
        None => err.to_string(),
    };
    DbError::new(kind, message)
}
