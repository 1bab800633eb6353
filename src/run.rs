//! Entry points for the `run` and hidden `worker` subcommands.

use crate::config::RunConfig;
use crate::registry::workloads;
use anyhow::Context;
use pgworkload_engine::{
    describe_partitioning, serve_worker_process, threads_per_process, ConfigError, Coordinator,
    Exporter, Launcher, RunOutcome, SubprocessLauncher, ThreadLauncher, WorkerSettings,
    WorkloadSpec,
};
use pgworkload_postgresql::PostgresConnector;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Coordinate a run and print the final statistics.
pub async fn run_workload(config: RunConfig) -> anyhow::Result<RunOutcome> {
    let spec = &config.spec;
    let partition = threads_per_process(spec.concurrency, spec.procs)?;
    workloads().get(&spec.workload)?;
    let connector = PostgresConnector::from_url(&spec.dburl)?;
    info!(
        "Running workload '{}' against database '{}' as '{}'",
        spec.workload,
        connector.dbname().unwrap_or_default(),
        connector.application_name().unwrap_or_default()
    );
    info!("{}", describe_partitioning(&partition, spec.ramp));

    let mut coordinator = Coordinator::new(config.frequency);
    if let Some(port) = config.prom_port {
        let exporter = Arc::new(Exporter::new()?);
        let addr = Arc::clone(&exporter)
            .serve(port)
            .await
            .with_context(|| format!("Failed to start the metrics endpoint on port {port}"))?;
        info!("Prometheus metrics available at http://{}/metrics", addr);
        coordinator = coordinator.with_exporter(exporter);
    }

    let outcome = if config.in_process {
        let mut launcher = ThreadLauncher::new(worker_settings(spec)?);
        drive(coordinator, &mut launcher, &partition, spec.ramp).await
    } else {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
        let mut launcher = SubprocessLauncher::current_exe(spec.clone())
            .context("Failed to locate the pgworkload executable")?
            .with_log_filter(filter);
        drive(coordinator, &mut launcher, &partition, spec.ramp).await
    };

    println!("{}", outcome.report);
    info!("Run finished: {:?}", outcome.status);
    Ok(outcome)
}

async fn drive<L: Launcher>(
    coordinator: Coordinator,
    launcher: &mut L,
    partition: &[usize],
    ramp: Duration,
) -> RunOutcome {
    coordinator
        .run(launcher, partition, ramp, interrupted())
        .await
}

/// Resolves on the first Ctrl-C.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for interrupts: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Worker settings for a PostgreSQL run of `spec`.
pub fn worker_settings(
    spec: &WorkloadSpec,
) -> Result<WorkerSettings<PostgresConnector>, ConfigError> {
    let factory = workloads().get(&spec.workload)?;
    let connector = PostgresConnector::from_url(&spec.dburl)?;
    Ok(WorkerSettings::new(
        Arc::new(connector),
        factory,
        spec.args.clone(),
        spec.limits(),
        spec.autocommit,
    ))
}

/// Body of the hidden `worker` subcommand: one process worker speaking
/// the control protocol on stdin and stdout.
pub fn serve_worker(threads: usize) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads.max(1))
        .enable_all()
        .build()
        .context("Failed to build the worker runtime")?;

    let result = runtime.block_on(async {
        // Stop requests arrive on stdin; the terminal's interrupt is for the coordinator.
        tokio::spawn(async {
            while tokio::signal::ctrl_c().await.is_ok() {
                debug!("Worker process ignoring interrupt");
            }
        });
        serve_worker_process(tokio::io::stdin(), tokio::io::stdout(), worker_settings).await
    });
    // A blocked stdin read must not keep the process alive.
    runtime.shutdown_background();
    result.context("Worker process failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(workload: &str, dburl: &str) -> WorkloadSpec {
        WorkloadSpec {
            concurrency: 2,
            procs: 1,
            ramp: Duration::ZERO,
            iterations: 5,
            duration: Duration::ZERO,
            conn_duration: Duration::from_secs(60),
            autocommit: false,
            dburl: dburl.to_string(),
            workload: workload.to_string(),
            args: json!({"read_pct": 50}).as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_worker_settings_carry_limits() {
        let settings = worker_settings(&spec("kv", "postgres://root@localhost/bank")).unwrap();
        assert_eq!(settings.limits.iterations, 5);
        assert_eq!(settings.limits.conn_duration, Some(Duration::from_secs(60)));
        assert!(!settings.autocommit);
        assert_eq!(settings.args.get("read_pct"), Some(&json!(50)));
    }

    #[test]
    fn test_worker_settings_reject_unknown_workload() {
        let err = worker_settings(&spec("ycsb", "postgres://root@localhost/bank"))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownWorkload { .. }));
    }

    #[test]
    fn test_worker_settings_reject_url_without_database() {
        let err = worker_settings(&spec("kv", "postgres://root@localhost"))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Url(_)));
    }
}
