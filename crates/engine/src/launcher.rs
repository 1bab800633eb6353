//! Starting process workers.

use crate::control::WorkerChannels;
use crate::error::ErrorKind;
use crate::sample::Sample;
use crate::session::Connector;
use crate::worker::{ProcessWorker, WorkerSettings};
use std::io;
use tracing::{debug, error};

/// Starts one process worker per call.
///
/// Launching is fire-and-forget: the coordinator learns about the workers
/// only through the channels it hands over, never through a handle.
pub trait Launcher {
    /// Start process worker `index` running `workers` leaf workers.
    fn launch(&mut self, index: usize, workers: usize, channels: WorkerChannels) -> io::Result<()>;
}

/// Runs each process worker on a dedicated OS thread with its own runtime.
pub struct ThreadLauncher<C: Connector> {
    settings: WorkerSettings<C>,
}

impl<C: Connector> ThreadLauncher<C> {
    pub fn new(settings: WorkerSettings<C>) -> Self {
        Self { settings }
    }
}

impl<C: Connector> Launcher for ThreadLauncher<C> {
    fn launch(&mut self, index: usize, workers: usize, channels: WorkerChannels) -> io::Result<()> {
        let settings = self.settings.clone();

        std::thread::Builder::new()
            .name(format!("process-worker-{index}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(workers.max(1))
                    .thread_name(format!("worker-{index}"))
                    .enable_all()
                    .build();

                match runtime {
                    Ok(runtime) => {
                        let exits =
                            runtime.block_on(ProcessWorker::new(index, workers, settings, channels).run());
                        debug!("Process worker {} finished: {:?}", index, exits);
                    }
                    Err(e) => {
                        error!("Process worker {}: failed to start runtime: {}", index, e);
                        for _ in 0..workers {
                            channels.metrics.finish_blocking(Sample::error(
                                ErrorKind::Other,
                                format!("process worker {index} failed to start: {e}"),
                            ));
                        }
                    }
                }
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlPlane;
    use crate::testing::{scripted_args, scripted_factory, MemoryConnector};
    use crate::worker::Limits;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_thread_launcher_runs_workers_on_own_runtime() {
        let mut control = ControlPlane::default();
        let connector = Arc::new(MemoryConnector::default());
        let limits = Limits {
            iterations: 2,
            ..Limits::default()
        };
        let settings = WorkerSettings::new(
            Arc::clone(&connector),
            scripted_factory,
            scripted_args(json!({})),
            limits,
            false,
        );
        let mut launcher = ThreadLauncher::new(settings);

        launcher.launch(0, 3, control.worker_channels()).unwrap();

        let mut done = 0;
        while done < 3 {
            let sample = tokio::time::timeout(Duration::from_secs(5), control.metrics_rx.recv())
                .await
                .expect("workers should finish")
                .unwrap();
            if sample == Sample::Done {
                done += 1;
            }
        }
        assert_eq!(connector.opened(), 3);
    }
}
