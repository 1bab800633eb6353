//! Messages carried on the metrics channel.

use crate::error::{DbError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stats label for a full workload cycle.
pub const CYCLE_LABEL: &str = "__cycle__";

/// One message from a worker to the coordinator.
///
/// Every worker emits zero or more `Timing` samples followed by exactly one
/// terminal message (`Done` or `Error`), unless it was stopped through the
/// termination channel, in which case it acknowledges instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Sample {
    /// A successful transaction or cycle.
    Timing { label: String, elapsed_secs: f64 },
    /// The worker reached its iteration or duration limit.
    Done,
    /// The worker stopped on an unrecoverable error.
    Error { kind: ErrorKind, detail: String },
}

impl Sample {
    pub fn timing(label: impl Into<String>, elapsed: Duration) -> Self {
        Sample::Timing {
            label: label.into(),
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }

    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Sample::Error {
            kind,
            detail: detail.into(),
        }
    }

    /// Whether this is the last message a worker emits.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Sample::Timing { .. })
    }
}

impl From<DbError> for Sample {
    fn from(err: DbError) -> Self {
        Sample::Error {
            kind: err.kind,
            detail: err.message,
        }
    }
}
