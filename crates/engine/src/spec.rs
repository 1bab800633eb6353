//! Run configuration shared by the coordinator and every worker process.

use crate::workload::WorkloadArgs;
use crate::worker::Limits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable description of a run.
///
/// Built once at startup; worker processes receive a serialized copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Total number of leaf workers (database sessions).
    pub concurrency: usize,
    /// Number of worker processes.
    pub procs: usize,
    /// Time over which process launches are spread.
    pub ramp: Duration,
    /// Cycles per worker; 0 means unlimited.
    pub iterations: u64,
    /// Wall-clock limit per worker; zero means unlimited.
    pub duration: Duration,
    /// Reconnect interval per worker; zero means keep the session.
    pub conn_duration: Duration,
    pub autocommit: bool,
    pub dburl: String,
    /// Registered workload name.
    pub workload: String,
    #[serde(default)]
    pub args: WorkloadArgs,
}

impl WorkloadSpec {
    pub fn limits(&self) -> Limits {
        Limits {
            iterations: self.iterations,
            duration: non_zero(self.duration),
            conn_duration: non_zero(self.conn_duration),
        }
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}
