//! Run coordination: launching process workers on a ramp, folding their
//! samples into statistics, and deciding when and how the run ends.

use crate::control::ControlPlane;
use crate::error::ErrorKind;
use crate::exporter::Exporter;
use crate::launcher::Launcher;
use crate::partitioner::ramp_interval;
use crate::sample::Sample;
use crate::stats::{Stats, StatsReport};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// How long to wait for workers to acknowledge a stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunFailure {
    #[error("The schema is not present. Did you initialize the workload?")]
    SchemaMissing,
    #[error("{kind} error: {detail}")]
    Worker { kind: ErrorKind, detail: String },
    #[error("failed to launch process worker {index}: {reason}")]
    Launch { index: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Every worker reached its limits.
    Completed,
    /// Stopped by an interrupt; `acknowledged` workers confirmed the stop.
    Interrupted { acknowledged: usize },
    /// Every worker exited and at least one of them failed.
    Failed(RunFailure),
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Statistics of the final window.
    pub report: StatsReport,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Completed | RunStatus::Interrupted { .. } => 0,
            RunStatus::Failed(_) => 1,
        }
    }
}

/// Drives one run from the first launch to the last terminal message.
pub struct Coordinator {
    frequency: Duration,
    shutdown_timeout: Duration,
    stats: Stats,
    control: ControlPlane,
}

impl Coordinator {
    /// `frequency` is the interval between statistics reports.
    pub fn new(frequency: Duration) -> Self {
        Self {
            frequency,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            stats: Stats::new(),
            control: ControlPlane::default(),
        }
    }

    pub fn with_exporter(mut self, exporter: Arc<Exporter>) -> Self {
        self.stats = self.stats.with_exporter(exporter);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Launch one process worker per `partition` entry, spreading launches
    /// over `ramp`, and run until every worker has sent its terminal message
    /// or `interrupt` resolves.
    pub async fn run<L, F>(
        self,
        launcher: &mut L,
        partition: &[usize],
        ramp: Duration,
        interrupt: F,
    ) -> RunOutcome
    where
        L: Launcher,
        F: Future<Output = ()>,
    {
        let Coordinator {
            frequency,
            shutdown_timeout,
            mut stats,
            control,
        } = self;
        let (mut metrics_rx, mut ack_rx, channels) = control.into_parts();
        let termination = channels.termination.clone();

        let concurrency: usize = partition.iter().sum();
        let launch_interval = ramp_interval(ramp, partition.len());
        let frequency = frequency.max(Duration::from_millis(1));

        let start = Instant::now();
        let mut ticker = interval_at(start + frequency, frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(interrupt);

        let mut next_process = 0usize;
        let mut next_launch_at = start;
        let mut launched = 0usize;
        let mut terminals = 0usize;
        let mut launch_failures = 0usize;
        let mut failure: Option<RunFailure> = None;

        while terminals < concurrency {
            tokio::select! {
                biased;

                _ = &mut interrupt => {
                    info!("Interrupt received, stopping workers");
                    // Workers that never launched are not in `launched`.
                    let live = launched.saturating_sub(terminals - launch_failures);
                    termination.broadcast(live);
                    let acknowledged =
                        await_acks(&mut metrics_rx, &mut ack_rx, live, shutdown_timeout).await;
                    return RunOutcome {
                        status: RunStatus::Interrupted { acknowledged },
                        report: stats.report(),
                    };
                }

                _ = ticker.tick() => {
                    println!("{}", stats.flush());
                }

                _ = sleep_until(next_launch_at), if next_process < partition.len() => {
                    let workers = partition[next_process];
                    match launcher.launch(next_process, workers, channels.clone()) {
                        Ok(()) => {
                            info!("Launched process worker {} with {} workers", next_process, workers);
                            launched += workers;
                        }
                        Err(e) => {
                            error!("Failed to launch process worker {}: {}", next_process, e);
                            terminals += workers;
                            launch_failures += workers;
                            record_failure(&mut failure, RunFailure::Launch {
                                index: next_process,
                                reason: e.to_string(),
                            });
                        }
                    }
                    next_process += 1;
                    next_launch_at += launch_interval;
                }

                Some(sample) = metrics_rx.recv() => match sample {
                    Sample::Timing { label, elapsed_secs } => stats.add_sample(&label, elapsed_secs),
                    Sample::Done => terminals += 1,
                    Sample::Error { kind, detail } => {
                        terminals += 1;
                        error!("Worker failed with {} error: {}", kind, detail);
                        let reported = if kind == ErrorKind::SchemaMissing {
                            RunFailure::SchemaMissing
                        } else {
                            RunFailure::Worker { kind, detail }
                        };
                        record_failure(&mut failure, reported);
                    }
                },
            }
        }

        // Timings still queued behind the last terminal belong to the final window.
        while let Ok(Sample::Timing { label, elapsed_secs }) = metrics_rx.try_recv() {
            stats.add_sample(&label, elapsed_secs);
        }

        let status = match failure {
            Some(failure) => {
                error!("{}", failure);
                RunStatus::Failed(failure)
            }
            None => {
                info!("All {} workers completed", concurrency);
                RunStatus::Completed
            }
        };
        RunOutcome {
            status,
            report: stats.report(),
        }
    }
}

/// Keep the last failure, except that a missing schema is never replaced.
fn record_failure(current: &mut Option<RunFailure>, new: RunFailure) {
    if !matches!(current, Some(RunFailure::SchemaMissing)) {
        *current = Some(new);
    }
}

/// Wait for `expected` stops to be acknowledged, discarding samples. A
/// worker that finishes on its own meanwhile no longer needs to acknowledge.
async fn await_acks(
    metrics_rx: &mut mpsc::Receiver<Sample>,
    ack_rx: &mut mpsc::UnboundedReceiver<()>,
    expected: usize,
    timeout: Duration,
) -> usize {
    let deadline = sleep_until(Instant::now() + timeout);
    tokio::pin!(deadline);

    let mut expected = expected;
    let mut acknowledged = 0usize;
    while acknowledged < expected {
        tokio::select! {
            biased;

            Some(()) = ack_rx.recv() => acknowledged += 1,
            Some(sample) = metrics_rx.recv() => {
                if sample.is_terminal() {
                    expected = expected.saturating_sub(1);
                }
            }
            _ = &mut deadline => {
                warn!("Timeout reached - forcing workers to stop");
                break;
            }
        }
    }
    info!("{} of {} workers acknowledged the stop", acknowledged, expected);
    acknowledged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::WorkerChannels;
    use std::io;

    /// Launcher that plays back canned samples for every worker.
    struct ScriptLauncher {
        per_worker: Vec<Sample>,
        fail_index: Option<usize>,
        launches: Vec<(usize, usize, Instant)>,
    }

    impl ScriptLauncher {
        fn new(per_worker: Vec<Sample>) -> Self {
            Self {
                per_worker,
                fail_index: None,
                launches: Vec::new(),
            }
        }
    }

    impl Launcher for ScriptLauncher {
        fn launch(&mut self, index: usize, workers: usize, channels: WorkerChannels) -> io::Result<()> {
            self.launches.push((index, workers, Instant::now()));
            if self.fail_index == Some(index) {
                return Err(io::Error::other("spawn refused"));
            }
            let script = self.per_worker.clone();
            tokio::spawn(async move {
                for _ in 0..workers {
                    for sample in &script {
                        channels.metrics.finish(sample.clone()).await;
                    }
                }
            });
            Ok(())
        }
    }

    fn done_script() -> Vec<Sample> {
        vec![
            Sample::timing("noop", Duration::from_millis(2)),
            Sample::timing(crate::CYCLE_LABEL, Duration::from_millis(2)),
            Sample::Done,
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_when_every_worker_is_done() {
        let mut launcher = ScriptLauncher::new(done_script());
        let outcome = Coordinator::new(Duration::from_secs(10))
            .run(&mut launcher, &[2, 1], Duration::ZERO, std::future::pending())
            .await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.report.total_ops("noop"), 3);
        assert_eq!(outcome.report.total_ops(crate::CYCLE_LABEL), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_spreads_launches() {
        let mut launcher = ScriptLauncher::new(done_script());
        Coordinator::new(Duration::from_secs(10))
            .run(&mut launcher, &[1, 1, 1, 1], Duration::from_secs(8), std::future::pending())
            .await;

        let times: Vec<Instant> = launcher.launches.iter().map(|l| l.2).collect();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(1990) && gap <= Duration::from_millis(2010), "gap {gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_missing_wins_over_later_errors() {
        struct Mixed;
        impl Launcher for Mixed {
            fn launch(&mut self, index: usize, _: usize, channels: WorkerChannels) -> io::Result<()> {
                tokio::spawn(async move {
                    let sample = if index == 0 {
                        Sample::error(ErrorKind::SchemaMissing, "relation \"kv\" does not exist")
                    } else {
                        Sample::error(ErrorKind::Other, "boom")
                    };
                    channels.metrics.finish(sample).await;
                });
                Ok(())
            }
        }

        let outcome = Coordinator::new(Duration::from_secs(10))
            .run(&mut Mixed, &[1, 1], Duration::from_secs(1), std::future::pending())
            .await;

        assert_eq!(outcome.status, RunStatus::Failed(RunFailure::SchemaMissing));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(
            RunFailure::SchemaMissing.to_string(),
            "The schema is not present. Did you initialize the workload?"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_failure_counts_as_terminal() {
        let mut launcher = ScriptLauncher::new(done_script());
        launcher.fail_index = Some(1);
        let outcome = Coordinator::new(Duration::from_secs(10))
            .run(&mut launcher, &[1, 2], Duration::ZERO, std::future::pending())
            .await;

        assert!(matches!(
            outcome.status,
            RunStatus::Failed(RunFailure::Launch { index: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_without_acks_times_out() {
        let mut launcher = ScriptLauncher::new(vec![]);
        let outcome = Coordinator::new(Duration::from_secs(10))
            .with_shutdown_timeout(Duration::from_secs(5))
            .run(
                &mut launcher,
                &[2],
                Duration::ZERO,
                tokio::time::sleep(Duration::from_secs(1)),
            )
            .await;

        assert_eq!(outcome.status, RunStatus::Interrupted { acknowledged: 0 });
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_after_launch_failure_stops_running_workers() {
        /// The first process worker waits for its pill; the second never starts.
        struct HalfStarted;
        impl Launcher for HalfStarted {
            fn launch(&mut self, index: usize, _: usize, channels: WorkerChannels) -> io::Result<()> {
                if index == 1 {
                    return Err(io::Error::other("spawn refused"));
                }
                tokio::spawn(async move {
                    channels.termination.take().await;
                    channels.acks.ack();
                });
                Ok(())
            }
        }

        let outcome = Coordinator::new(Duration::from_secs(10))
            .with_shutdown_timeout(Duration::from_secs(5))
            .run(
                &mut HalfStarted,
                &[1, 2],
                Duration::ZERO,
                tokio::time::sleep(Duration::from_secs(1)),
            )
            .await;

        assert_eq!(outcome.status, RunStatus::Interrupted { acknowledged: 1 });
    }

    #[test]
    fn test_record_failure_keeps_schema_missing() {
        let mut failure = None;
        record_failure(&mut failure, RunFailure::Worker { kind: ErrorKind::Other, detail: "a".into() });
        record_failure(&mut failure, RunFailure::SchemaMissing);
        record_failure(&mut failure, RunFailure::Worker { kind: ErrorKind::Other, detail: "b".into() });
        assert_eq!(failure, Some(RunFailure::SchemaMissing));
    }
}
