//! Worker execution.
//!
//! A [`ProcessWorker`] owns a fixed pool of leaf [`Worker`]s. Each leaf
//! worker holds one database session at a time and runs workload cycles on
//! it until it reaches its limits, takes a poison pill, or hits a fatal
//! error.

use crate::control::WorkerChannels;
use crate::error::{DbError, ErrorKind};
use crate::retry::run_transaction;
use crate::sample::{Sample, CYCLE_LABEL};
use crate::session::Connector;
use crate::workload::{Workload, WorkloadArgs, WorkloadFactory};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Pause before reconnecting after a connectivity error.
pub const TRANSIENT_ERROR_DELAY: Duration = Duration::from_secs(5);

/// Relative jitter applied to the connection duration.
const CONN_DURATION_JITTER: f64 = 0.1;

/// Per-worker stopping conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    /// Cycles to run; 0 means unlimited.
    pub iterations: u64,
    /// Wall-clock budget for the worker.
    pub duration: Option<Duration>,
    /// Session lifetime before the worker reconnects.
    pub conn_duration: Option<Duration>,
}

/// Everything a worker needs besides its session and channels.
pub struct WorkerSettings<C: Connector> {
    pub connector: Arc<C>,
    pub factory: WorkloadFactory<C::Session>,
    pub args: Arc<WorkloadArgs>,
    pub limits: Limits,
    pub autocommit: bool,
    pub transient_delay: Duration,
}

impl<C: Connector> Clone for WorkerSettings<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            factory: self.factory,
            args: Arc::clone(&self.args),
            limits: self.limits,
            autocommit: self.autocommit,
            transient_delay: self.transient_delay,
        }
    }
}

impl<C: Connector> WorkerSettings<C> {
    pub fn new(
        connector: Arc<C>,
        factory: WorkloadFactory<C::Session>,
        args: WorkloadArgs,
        limits: Limits,
        autocommit: bool,
    ) -> Self {
        Self {
            connector,
            factory,
            args: Arc::new(args),
            limits,
            autocommit,
            transient_delay: TRANSIENT_ERROR_DELAY,
        }
    }

    pub fn with_transient_delay(mut self, delay: Duration) -> Self {
        self.transient_delay = delay;
        self
    }
}

/// How a worker left its run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Took a poison pill and acknowledged it.
    Stopped,
    /// Reached its iteration or duration limit.
    Completed,
    /// Gave up on a fatal error.
    Failed(ErrorKind),
}

enum SessionEnd {
    Stopped,
    Completed,
    Rotate,
}

/// A leaf worker: one workload instance, one session at a time.
pub struct Worker<C: Connector> {
    id: String,
    settings: WorkerSettings<C>,
    channels: WorkerChannels,
}

impl<C: Connector> Worker<C> {
    pub fn new(id: impl Into<String>, settings: WorkerSettings<C>, channels: WorkerChannels) -> Self {
        Self {
            id: id.into(),
            settings,
            channels,
        }
    }

    /// Run until stopped, completed or failed.
    ///
    /// Emits exactly one terminal sample unless stopped by a poison pill,
    /// in which case it emits exactly one acknowledgment instead.
    pub async fn run(self) -> WorkerExit {
        debug!("Worker {} created", self.id);

        let mut workload = match (self.settings.factory)(&self.settings.args) {
            Ok(workload) => workload,
            Err(e) => {
                error!("Worker {}: workload initialization failed: {}", self.id, e);
                self.channels
                    .metrics
                    .finish(Sample::error(
                        ErrorKind::Other,
                        format!("Workload initialization failed: {e}"),
                    ))
                    .await;
                return WorkerExit::Failed(ErrorKind::Other);
            }
        };

        let deadline = self.settings.limits.duration.map(|d| Instant::now() + d);
        let mut completed = 0u64;

        loop {
            if self.take_pill() {
                return WorkerExit::Stopped;
            }

            let conn_deadline = self
                .settings
                .limits
                .conn_duration
                .map(|d| Instant::now() + jittered(d));

            match self
                .run_session(workload.as_mut(), &mut completed, deadline, conn_deadline)
                .await
            {
                Ok(SessionEnd::Rotate) => {
                    debug!("Worker {}: connection duration reached, reconnecting", self.id);
                }
                Ok(SessionEnd::Stopped) => return WorkerExit::Stopped,
                Ok(SessionEnd::Completed) => {
                    debug!("Worker {}: task completed after {} cycles", self.id, completed);
                    self.channels.metrics.finish(Sample::Done).await;
                    return WorkerExit::Completed;
                }
                Err(e) if e.kind == ErrorKind::Connectivity => {
                    warn!("Worker {}: {}", self.id, e);
                    info!(
                        "Worker {}: sleeping for {:?} before reconnecting",
                        self.id, self.settings.transient_delay
                    );
                    tokio::time::sleep(self.settings.transient_delay).await;
                }
                Err(e) => {
                    error!("Worker {}: {}", self.id, e);
                    let kind = e.kind;
                    self.channels.metrics.finish(Sample::from(e)).await;
                    return WorkerExit::Failed(kind);
                }
            }
        }
    }

    /// Open a session and run cycles on it. The session is dropped, and so
    /// released, whichever way this returns.
    async fn run_session(
        &self,
        workload: &mut dyn Workload<C::Session>,
        completed: &mut u64,
        deadline: Option<Instant>,
        conn_deadline: Option<Instant>,
    ) -> Result<SessionEnd, DbError> {
        let mut session = self.settings.connector.connect().await?;
        debug!("Worker {}: connection started", self.id);

        let iterations = self.settings.limits.iterations;
        loop {
            if self.take_pill() {
                return Ok(SessionEnd::Stopped);
            }

            let now = Instant::now();
            if (iterations > 0 && *completed >= iterations) || deadline.is_some_and(|d| now >= d) {
                return Ok(SessionEnd::Completed);
            }

            if conn_deadline.is_some_and(|d| now >= d) {
                return Ok(SessionEnd::Rotate);
            }

            let cycle_start = Instant::now();
            for txn in workload.cycle() {
                let start = Instant::now();
                run_transaction(&mut session, txn.as_ref(), self.settings.autocommit).await?;
                self.channels
                    .metrics
                    .offer(Sample::timing(txn.name(), start.elapsed()));
            }

            *completed += 1;
            self.channels
                .metrics
                .offer(Sample::timing(CYCLE_LABEL, cycle_start.elapsed()));
        }
    }

    fn take_pill(&self) -> bool {
        if self.channels.termination.try_take() {
            debug!("Worker {}: poison pill received", self.id);
            self.channels.acks.ack();
            return true;
        }
        false
    }
}

fn jittered(duration: Duration) -> Duration {
    let factor: f64 = rand::rng()
        .random_range((1.0 - CONN_DURATION_JITTER)..=(1.0 + CONN_DURATION_JITTER));
    duration.mul_f64(factor)
}

/// A process-level worker: runs one leaf worker itself and a pool of
/// `workers - 1` concurrent leaf workers next to it, all sharing the same
/// channels.
pub struct ProcessWorker<C: Connector> {
    index: usize,
    workers: usize,
    settings: WorkerSettings<C>,
    channels: WorkerChannels,
}

impl<C: Connector> ProcessWorker<C> {
    pub fn new(
        index: usize,
        workers: usize,
        settings: WorkerSettings<C>,
        channels: WorkerChannels,
    ) -> Self {
        Self {
            index,
            workers,
            settings,
            channels,
        }
    }

    /// Run all leaf workers and wait for every one of them to exit.
    pub async fn run(self) -> Vec<WorkerExit> {
        debug!(
            "Process worker {} created with {} workers",
            self.index, self.workers
        );
        if self.workers == 0 {
            return Vec::new();
        }

        let mut pool = JoinSet::new();
        for thread in 1..self.workers {
            let worker = Worker::new(
                format!("{}.{}", self.index, thread),
                self.settings.clone(),
                self.channels.clone(),
            );
            pool.spawn(worker.run());
        }

        let own = Worker::new(format!("{}.0", self.index), self.settings, self.channels)
            .run()
            .await;

        let mut exits = vec![own];
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(exit) => exits.push(exit),
                Err(e) => error!("Process worker {}: worker task failed: {}", self.index, e),
            }
        }
        exits
    }
}
