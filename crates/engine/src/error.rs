//! Error types for the workload engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a database failure, decided by the connector that
/// produced it. The worker's recovery policy depends only on this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A table or schema the workload needs does not exist.
    SchemaMissing,
    /// The node is unreachable or the session was dropped.
    Connectivity,
    /// Transaction contention; safe to retry the transaction.
    Serialization,
    /// Anything else.
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::SchemaMissing => write!(f, "schema missing"),
            ErrorKind::Connectivity => write!(f, "connectivity"),
            ErrorKind::Serialization => write!(f, "serialization"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

/// A classified database error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct DbError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DbError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn schema_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaMissing, message)
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connectivity, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }
}

/// Errors detected before any worker starts, or while constructing a workload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Concurrency must be at least one.
    #[error("Concurrency must be a positive number, got {0}")]
    Concurrency(usize),

    /// Process count must be at least one.
    #[error("Process count must be a positive number, got {0}")]
    ProcessCount(usize),

    /// A workload argument has the wrong type or an unsupported value.
    #[error("Invalid value for argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    /// No workload is registered under this name.
    #[error("Unknown workload '{name}'. Available workloads: {available}")]
    UnknownWorkload { name: String, available: String },

    /// The database URL cannot be used.
    #[error("Invalid database URL: {0}")]
    Url(String),
}

impl ConfigError {
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
