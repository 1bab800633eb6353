//! In-memory connector and scripted workload for exercising the engine
//! without a database.
//!
//! The scripted workload is configured entirely through its arguments so it
//! can be registered like any other workload:
//!
//! - `sleep_ms`: time each transaction takes (default 0)
//! - `fail_with`: `schema_missing`, `connectivity`, `serialization` or `other`
//! - `fail_after`: successful cycles before transactions start failing
//! - `key_type`: `invalid` makes construction fail

use crate::error::{ConfigError, DbError, ErrorKind};
use crate::session::{Connector, Session};
use crate::workload::{arg_str, arg_u64, Transaction, Workload, WorkloadArgs};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Session that records what was run on it.
#[derive(Debug, Default)]
pub struct MemorySession {
    pub statements: u64,
    pub begins: u64,
    pub commits: u64,
    pub rollbacks: u64,
    released: Option<Arc<AtomicUsize>>,
}

#[async_trait]
impl Session for MemorySession {
    async fn begin(&mut self) -> Result<(), DbError> {
        self.begins += 1;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.rollbacks += 1;
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if let Some(released) = &self.released {
            released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Connector handing out [`MemorySession`]s and counting them.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    attempts: AtomicUsize,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
    failures_left: AtomicUsize,
    failure_kind: Option<ErrorKind>,
}

impl MemoryConnector {
    /// The first `count` connection attempts fail with `kind`.
    pub fn failing_connects(count: usize, kind: ErrorKind) -> Self {
        Self {
            failures_left: AtomicUsize::new(count),
            failure_kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Session = MemorySession;

    async fn connect(&self) -> Result<MemorySession, DbError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(kind) = self.failure_kind {
            let claimed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if claimed {
                return Err(DbError::new(kind, "scripted connection failure"));
            }
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            statements: 0,
            begins: 0,
            commits: 0,
            rollbacks: 0,
            released: Some(Arc::clone(&self.released)),
        })
    }
}

/// Transaction that succeeds, optionally after failing a number of times.
pub struct StaticTransaction {
    name: String,
    failure: Option<ErrorKind>,
    failures_left: AtomicU32,
    sleep: Duration,
}

impl StaticTransaction {
    pub fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failure: None,
            failures_left: AtomicU32::new(0),
            sleep: Duration::ZERO,
        }
    }

    pub fn failing_times(name: &str, kind: ErrorKind, times: u32) -> Self {
        Self {
            failure: Some(kind),
            failures_left: AtomicU32::new(times),
            ..Self::ok(name)
        }
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }
}

#[async_trait]
impl Transaction<MemorySession> for StaticTransaction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, session: &mut MemorySession) -> Result<(), DbError> {
        session.statements += 1;
        if !self.sleep.is_zero() {
            tokio::time::sleep(self.sleep).await;
        }

        if let Some(kind) = self.failure {
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failed {
                return Err(DbError::new(kind, format!("scripted failure in {}", self.name)));
            }
        }
        Ok(())
    }
}

/// Workload with a single `noop` transaction per cycle.
pub struct ScriptedWorkload {
    sleep: Duration,
    failure: Option<ErrorKind>,
    fail_after: u64,
    cycles: u64,
}

impl Workload<MemorySession> for ScriptedWorkload {
    fn cycle(&mut self) -> Vec<Box<dyn Transaction<MemorySession>>> {
        let txn = StaticTransaction::ok("noop").with_sleep(self.sleep);
        let txn = match self.failure {
            Some(kind) if self.cycles >= self.fail_after => StaticTransaction {
                failure: Some(kind),
                failures_left: AtomicU32::new(u32::MAX),
                ..txn
            },
            _ => txn,
        };
        self.cycles += 1;
        vec![Box::new(txn)]
    }
}

/// Factory for [`ScriptedWorkload`].
pub fn scripted_factory(
    args: &WorkloadArgs,
) -> Result<Box<dyn Workload<MemorySession>>, ConfigError> {
    if arg_str(args, "key_type", "bytes")? == "invalid" {
        return Err(ConfigError::invalid_argument(
            "key_type",
            "the selected key_type 'invalid' is not supported",
        ));
    }

    let failure = match arg_str(args, "fail_with", "")?.as_str() {
        "" => None,
        "schema_missing" => Some(ErrorKind::SchemaMissing),
        "connectivity" => Some(ErrorKind::Connectivity),
        "serialization" => Some(ErrorKind::Serialization),
        "other" => Some(ErrorKind::Other),
        unknown => {
            return Err(ConfigError::invalid_argument(
                "fail_with",
                format!("unknown failure '{unknown}'"),
            ))
        }
    };

    Ok(Box::new(ScriptedWorkload {
        sleep: Duration::from_millis(arg_u64(args, "sleep_ms", 0)?),
        failure,
        fail_after: arg_u64(args, "fail_after", 0)?,
        cycles: 0,
    }))
}

/// Convert a JSON object literal into workload arguments.
pub fn scripted_args(value: serde_json::Value) -> WorkloadArgs {
    match value {
        serde_json::Value::Object(map) => map,
        _ => WorkloadArgs::new(),
    }
}
