//! Control-plane channels between the coordinator and its workers.
//!
//! - metrics: bounded, many workers to one coordinator. Timing samples are
//!   offered without waiting and dropped when the channel is full; terminal
//!   messages wait for capacity so they are never lost.
//! - termination: a pool of poison pills. The coordinator adds one pill per
//!   worker; each worker that takes one stops.
//! - acks: one message per stopped worker, back to the coordinator.

use crate::sample::Sample;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

/// Capacity of the metrics channel.
pub const METRICS_CHANNEL_CAPACITY: usize = 1000;

/// Worker side of the metrics channel.
#[derive(Clone, Debug)]
pub struct MetricsSender {
    tx: mpsc::Sender<Sample>,
}

impl MetricsSender {
    pub fn new(tx: mpsc::Sender<Sample>) -> Self {
        Self { tx }
    }

    /// Offer a timing sample without waiting. Returns false if it was dropped.
    pub fn offer(&self, sample: Sample) -> bool {
        self.tx.try_send(sample).is_ok()
    }

    /// Deliver a terminal message, waiting for channel capacity.
    pub async fn finish(&self, sample: Sample) {
        if self.tx.send(sample).await.is_err() {
            warn!("Metrics channel closed before the terminal message was delivered");
        }
    }

    /// Blocking variant of [`MetricsSender::finish`] for code outside a runtime.
    pub fn finish_blocking(&self, sample: Sample) {
        if self.tx.blocking_send(sample).is_err() {
            warn!("Metrics channel closed before the terminal message was delivered");
        }
    }
}

/// Shared pool of poison pills.
#[derive(Clone, Debug)]
pub struct Termination {
    pills: Arc<Semaphore>,
}

impl Default for Termination {
    fn default() -> Self {
        Self::new()
    }
}

impl Termination {
    pub fn new() -> Self {
        Self {
            pills: Arc::new(Semaphore::new(0)),
        }
    }

    /// Make `count` pills available.
    pub fn broadcast(&self, count: usize) {
        self.pills.add_permits(count);
    }

    /// Take one pill if one is available.
    pub fn try_take(&self) -> bool {
        match self.pills.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Wait for a pill and take it.
    pub async fn take(&self) {
        if let Ok(permit) = self.pills.acquire().await {
            permit.forget();
        }
    }

    /// Pills currently waiting to be taken.
    pub fn pending(&self) -> usize {
        self.pills.available_permits()
    }
}

/// Worker side of the acknowledgment channel.
#[derive(Clone, Debug)]
pub struct AckSender {
    tx: mpsc::UnboundedSender<()>,
}

impl AckSender {
    pub fn new(tx: mpsc::UnboundedSender<()>) -> Self {
        Self { tx }
    }

    pub fn ack(&self) {
        if self.tx.send(()).is_err() {
            warn!("Acknowledgment channel closed");
        }
    }
}

/// Channel handles given to every worker.
#[derive(Clone, Debug)]
pub struct WorkerChannels {
    pub metrics: MetricsSender,
    pub termination: Termination,
    pub acks: AckSender,
}

/// Coordinator side of all three channels.
pub struct ControlPlane {
    pub metrics_rx: mpsc::Receiver<Sample>,
    pub ack_rx: mpsc::UnboundedReceiver<()>,
    channels: WorkerChannels,
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new(METRICS_CHANNEL_CAPACITY)
    }
}

impl ControlPlane {
    pub fn new(metrics_capacity: usize) -> Self {
        let (metrics_tx, metrics_rx) = mpsc::channel(metrics_capacity);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        Self {
            metrics_rx,
            ack_rx,
            channels: WorkerChannels {
                metrics: MetricsSender::new(metrics_tx),
                termination: Termination::new(),
                acks: AckSender::new(ack_tx),
            },
        }
    }

    /// Handles to pass down to launchers and workers.
    pub fn worker_channels(&self) -> WorkerChannels {
        self.channels.clone()
    }

    pub fn termination(&self) -> &Termination {
        &self.channels.termination
    }

    /// Split into receivers and worker handles. Once every handle is
    /// dropped, both receivers report end of stream.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<Sample>,
        mpsc::UnboundedReceiver<()>,
        WorkerChannels,
    ) {
        (self.metrics_rx, self.ack_rx, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_each_pill_stops_one_worker() {
        let termination = Termination::new();
        assert!(!termination.try_take());

        termination.broadcast(2);
        assert_eq!(termination.pending(), 2);
        assert!(termination.try_take());
        assert!(termination.try_take());
        assert!(!termination.try_take());
    }

    #[tokio::test]
    async fn test_full_channel_drops_timings_but_not_terminals() {
        let mut control = ControlPlane::new(2);
        let channels = control.worker_channels();

        assert!(channels.metrics.offer(Sample::timing("a", Duration::ZERO)));
        assert!(channels.metrics.offer(Sample::timing("b", Duration::ZERO)));
        assert!(!channels.metrics.offer(Sample::timing("c", Duration::ZERO)));

        let sender = channels.metrics.clone();
        let terminal = tokio::spawn(async move { sender.finish(Sample::Done).await });

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(control.metrics_rx.recv().await.unwrap());
        }
        terminal.await.unwrap();

        assert_eq!(received.last(), Some(&Sample::Done));
        assert_eq!(received.iter().filter(|s| !s.is_terminal()).count(), 2);
    }

    #[tokio::test]
    async fn test_acks_reach_coordinator() {
        let mut control = ControlPlane::default();
        let channels = control.worker_channels();
        channels.acks.ack();
        channels.acks.ack();
        assert_eq!(control.ack_rx.recv().await, Some(()));
        assert_eq!(control.ack_rx.recv().await, Some(()));
    }

    #[tokio::test]
    async fn test_receivers_close_when_handles_drop() {
        let (mut metrics_rx, mut ack_rx, channels) = ControlPlane::default().into_parts();
        channels.metrics.offer(Sample::Done);
        drop(channels);
        assert_eq!(metrics_rx.recv().await, Some(Sample::Done));
        assert_eq!(metrics_rx.recv().await, None);
        assert_eq!(ack_rx.recv().await, None);
    }

    #[test]
    fn test_take_waits_for_broadcast() {
        let termination = Termination::new();
        let mut take = tokio_test::task::spawn(termination.take());
        tokio_test::assert_pending!(take.poll());

        termination.broadcast(1);
        assert!(take.is_woken());
        tokio_test::assert_ready!(take.poll());
        assert_eq!(termination.pending(), 0);
    }
}
