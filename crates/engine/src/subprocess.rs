//! Process workers as child processes.
//!
//! The parent re-executes its own binary in worker mode, sends it a
//! [`WorkerBootstrap`] and then one `stop` line per poison pill. The child
//! streams samples and acknowledgments back on stdout. See [`crate::wire`].

use crate::control::{ControlPlane, MetricsSender, Termination, WorkerChannels};
use crate::error::{ConfigError, ErrorKind};
use crate::launcher::Launcher;
use crate::sample::Sample;
use crate::session::Connector;
use crate::spec::WorkloadSpec;
use crate::wire::{decode_line, encode_line, ControlMessage, WorkerBootstrap, WorkerMessage};
use crate::worker::{ProcessWorker, WorkerSettings};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("I/O error on the control stream: {0}")]
    Io(#[from] io::Error),
    #[error("malformed control message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("control stream closed before the start message")]
    MissingStart,
    #[error("expected a start message, got {0:?}")]
    UnexpectedMessage(ControlMessage),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Launches each process worker as a child process.
pub struct SubprocessLauncher {
    program: PathBuf,
    args: Vec<String>,
    spec: WorkloadSpec,
    log_filter: Option<String>,
}

impl SubprocessLauncher {
    /// Re-execute the current binary as `<exe> worker`.
    pub fn current_exe(spec: WorkloadSpec) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["worker".to_string()], spec))
    }

    /// `program args... --threads N` must end up in [`serve_worker_process`],
    /// with N the number of workers of that process.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, spec: WorkloadSpec) -> Self {
        Self {
            program: program.into(),
            args,
            spec,
            log_filter: None,
        }
    }

    /// Pass a `RUST_LOG` filter to children.
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

impl Launcher for SubprocessLauncher {
    fn launch(&mut self, index: usize, workers: usize, channels: WorkerChannels) -> io::Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--threads")
            .arg(workers.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(filter) = &self.log_filter {
            command.env("RUST_LOG", filter);
        }
        // Keep terminal interrupts away from the children; the parent stops them.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
        debug!("Process worker {} started as pid {:?}", index, child.id());

        let bootstrap = WorkerBootstrap {
            index,
            workers,
            spec: self.spec.clone(),
        };
        let output = attach_child(stdin, stdout, bootstrap, channels);
        tokio::spawn(async move {
            if let Err(e) = output.await {
                error!("Process worker {}: output task failed: {}", index, e);
            }
            reap(child, index).await;
        });

        Ok(())
    }
}

/// Wire a started child to the coordinator's channels: one task forwards
/// control messages to `stdin`, the returned one relays `stdout`.
fn attach_child<W, R>(
    stdin: W,
    stdout: R,
    bootstrap: WorkerBootstrap,
    channels: WorkerChannels,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    let index = bootstrap.index;
    let workers = bootstrap.workers;
    let (finished_tx, finished_rx) = watch::channel(0usize);
    tokio::spawn(forward_control(
        stdin,
        bootstrap,
        channels.termination.clone(),
        finished_rx,
    ));
    tokio::spawn(async move {
        forward_worker_output(stdout, index, workers, &channels, &finished_tx).await;
    })
}

/// Send the bootstrap, then one `stop` per pill taken while the child still
/// has workers that neither finished nor were sent a stop.
///
/// `finished` counts the child's terminal messages; it closes with the
/// child's output. A pill taken for a worker that finished meanwhile goes
/// back to the pool so a live worker elsewhere can have it.
async fn forward_control<W>(
    stdin: W,
    bootstrap: WorkerBootstrap,
    termination: Termination,
    mut finished: watch::Receiver<usize>,
) where
    W: AsyncWrite + Unpin,
{
    let index = bootstrap.index;
    let workers = bootstrap.workers;
    let mut stdin = stdin;

    if let Err(e) = write_message(&mut stdin, &ControlMessage::Start(Box::new(bootstrap))).await {
        error!("Process worker {}: failed to send start message: {}", index, e);
        return;
    }

    let mut sent = 0usize;
    loop {
        if workers.saturating_sub(*finished.borrow_and_update()) <= sent {
            return;
        }
        tokio::select! {
            biased;

            changed = finished.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = termination.take() => {
                if workers.saturating_sub(*finished.borrow()) <= sent {
                    termination.broadcast(1);
                    return;
                }
                if let Err(e) = write_message(&mut stdin, &ControlMessage::Stop).await {
                    // The child is gone; its reader reports the missing workers.
                    debug!("Process worker {}: failed to forward stop: {}", index, e);
                    termination.broadcast(1);
                    return;
                }
                sent += 1;
            }
        }
    }
}

async fn write_message<W, T>(out: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let line = encode_line(message).map_err(io::Error::other)?;
    out.write_all(line.as_bytes()).await?;
    out.flush().await
}

/// Relay a child's output onto the coordinator's channels.
///
/// Each terminal message bumps `finished`. When the stream ends, every
/// worker that neither finished nor acknowledged a pill is reported as
/// failed so the coordinator's count still adds up.
async fn forward_worker_output<R>(
    stdout: R,
    index: usize,
    workers: usize,
    channels: &WorkerChannels,
    finished: &watch::Sender<usize>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    let mut accounted = 0usize;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Process worker {}: failed to read output: {}", index, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match decode_line::<WorkerMessage>(&line) {
            Ok(WorkerMessage::Sample(sample)) if sample.is_terminal() => {
                accounted += 1;
                finished.send_modify(|count| *count += 1);
                channels.metrics.finish(sample).await;
            }
            Ok(WorkerMessage::Sample(sample)) => {
                channels.metrics.offer(sample);
            }
            Ok(WorkerMessage::Ack) => {
                accounted += 1;
                channels.acks.ack();
            }
            Err(e) => warn!("Process worker {}: ignoring malformed line: {}", index, e),
        }
    }

    report_missing(&channels.metrics, index, workers.saturating_sub(accounted)).await;
}

async fn report_missing(metrics: &MetricsSender, index: usize, missing: usize) {
    if missing == 0 {
        return;
    }
    error!(
        "Process worker {} exited with {} workers unaccounted for",
        index, missing
    );
    for _ in 0..missing {
        metrics
            .finish(Sample::error(
                ErrorKind::Other,
                format!("worker process {index} exited unexpectedly"),
            ))
            .await;
    }
}

async fn reap(mut child: Child, index: usize) {
    match child.wait().await {
        Ok(status) if status.success() => debug!("Process worker {} exited", index),
        Ok(status) => warn!("Process worker {} exited with {}", index, status),
        Err(e) => warn!("Process worker {}: failed to wait for exit: {}", index, e),
    }
}

/// Child side of [`SubprocessLauncher`].
///
/// Reads the bootstrap from `input`, builds worker settings with `build`,
/// runs the process worker and streams its messages to `output`. A `stop`
/// line releases one pill; end of input releases enough pills to stop every
/// worker.
pub async fn serve_worker_process<R, W, C, F>(
    input: R,
    output: W,
    build: F,
) -> Result<(), SubprocessError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
    C: Connector,
    F: FnOnce(&WorkloadSpec) -> Result<WorkerSettings<C>, ConfigError>,
{
    let mut lines = BufReader::new(input).lines();
    let bootstrap = match lines.next_line().await? {
        Some(line) => match decode_line::<ControlMessage>(&line)? {
            ControlMessage::Start(bootstrap) => *bootstrap,
            other => return Err(SubprocessError::UnexpectedMessage(other)),
        },
        None => return Err(SubprocessError::MissingStart),
    };
    let mut out = BufWriter::new(output);
    let settings = match build(&bootstrap.spec) {
        Ok(settings) => settings,
        Err(e) => {
            // Report the reason for every worker before giving up.
            for _ in 0..bootstrap.workers {
                let sample = Sample::error(ErrorKind::Other, e.to_string());
                write_buffered(&mut out, &WorkerMessage::Sample(sample)).await?;
            }
            out.flush().await?;
            return Err(e.into());
        }
    };
    info!(
        "Process worker {} starting {} workers",
        bootstrap.index, bootstrap.workers
    );

    let (mut metrics_rx, mut ack_rx, channels) = ControlPlane::default().into_parts();

    let termination = channels.termination.clone();
    let workers = bootstrap.workers;
    let index = bootstrap.index;
    tokio::spawn(async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match decode_line::<ControlMessage>(&line) {
                    Ok(ControlMessage::Stop) => termination.broadcast(1),
                    Ok(other) => warn!("Process worker {}: ignoring {:?}", index, other),
                    Err(e) => warn!("Process worker {}: malformed control line: {}", index, e),
                },
                Ok(None) | Err(_) => {
                    info!("Process worker {}: control stream closed, stopping workers", index);
                    termination.broadcast(workers);
                    return;
                }
            }
        }
    });

    let process = tokio::spawn(ProcessWorker::new(index, workers, settings, channels).run());

    let mut metrics_open = true;
    let mut acks_open = true;
    while metrics_open || acks_open {
        tokio::select! {
            sample = metrics_rx.recv(), if metrics_open => match sample {
                Some(sample) => {
                    let terminal = sample.is_terminal();
                    write_buffered(&mut out, &WorkerMessage::Sample(sample)).await?;
                    if terminal || metrics_rx.is_empty() {
                        out.flush().await?;
                    }
                }
                None => metrics_open = false,
            },
            ack = ack_rx.recv(), if acks_open => match ack {
                Some(()) => {
                    write_buffered(&mut out, &WorkerMessage::Ack).await?;
                    out.flush().await?;
                }
                None => acks_open = false,
            },
        }
    }
    out.flush().await?;

    match process.await {
        Ok(exits) => debug!("Process worker {} finished: {:?}", index, exits),
        Err(e) => error!("Process worker {}: task failed: {}", index, e),
    }
    Ok(())
}

async fn write_buffered<W, T>(out: &mut W, message: &T) -> Result<(), SubprocessError>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let line = encode_line(message)?;
    out.write_all(line.as_bytes()).await?;
    Ok(())
}
