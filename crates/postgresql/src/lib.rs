//! PostgreSQL support for pgworkload.
//!
//! Provides the [`PostgresConnector`] that hands out one [`PgSession`] per
//! worker connection, and the mapping from PostgreSQL errors onto the
//! engine's [`ErrorKind`](pgworkload_engine::ErrorKind) taxonomy.

mod classify;
mod session;

pub use classify::{classify, classify_sqlstate, to_db_error};
pub use session::{PgSession, PostgresConnector};
