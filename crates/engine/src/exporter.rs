//! Prometheus exposition of per-transaction counts and latencies.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Latency buckets in seconds.
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    #[error("metric registration failed: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics endpoint failed to bind: {0}")]
    Bind(#[from] std::io::Error),
}

/// Transaction metrics held in a dedicated registry.
pub struct Exporter {
    registry: Registry,
    transactions: IntCounterVec,
    durations: HistogramVec,
}

impl Exporter {
    pub fn new() -> Result<Self, ExporterError> {
        let registry = Registry::new();

        let transactions = IntCounterVec::new(
            Opts::new(
                "pgworkload_transactions_total",
                "Total number of completed transactions",
            ),
            &["name"],
        )?;
        let durations = HistogramVec::new(
            HistogramOpts::new(
                "pgworkload_transaction_duration_seconds",
                "Transaction latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["name"],
        )?;

        registry.register(Box::new(transactions.clone()))?;
        registry.register(Box::new(durations.clone()))?;

        Ok(Self {
            registry,
            transactions,
            durations,
        })
    }

    pub fn observe(&self, name: &str, elapsed_secs: f64) {
        self.transactions.with_label_values(&[name]).inc();
        self.durations
            .with_label_values(&[name])
            .observe(elapsed_secs);
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_else(|_| String::from("Encoding error"))
    }

    /// Bind the metrics endpoint and answer scrapes in a background task.
    ///
    /// Port 0 picks a free port; the bound address is returned.
    pub async fn serve(self: Arc<Self>, port: u16) -> Result<SocketAddr, ExporterError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let addr = listener.local_addr()?;
        info!("Metrics server starting on {}", addr);

        tokio::spawn(async move {
            loop {
                let (mut socket, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Metrics server accept failed: {}", e);
                        continue;
                    }
                };
                let exporter = Arc::clone(&self);
                tokio::spawn(async move {
                    // The request itself is irrelevant; every path returns the metrics.
                    let mut request = [0u8; 1024];
                    let _ = socket.read(&mut request).await;

                    let body = exporter.encode();
                    let response = format!(
                        "HTTP/1.0 200 OK\r\nConnection: close\r\nContent-Length: {}\r\nContent-Type: text/plain; version=0.0.4\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        warn!("Failed to answer metrics scrape from {}: {}", peer, e);
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });

        Ok(addr)
    }
}
