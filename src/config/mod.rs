//! Run configuration: turns command-line arguments into a [`WorkloadSpec`].

pub mod duration;

use crate::cli::RunArgs;
use anyhow::{bail, Context};
use pgworkload_engine::{WorkloadArgs, WorkloadSpec};
use pgworkload_postgresql::PostgresConnector;
use std::path::Path;
use std::time::Duration;
use url::Url;

const APPLICATION_NAME: &str = "application_name";

/// Validated settings for one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub spec: WorkloadSpec,
    pub frequency: Duration,
    pub prom_port: Option<u16>,
    pub in_process: bool,
    pub log_level: String,
}

impl RunConfig {
    pub fn from_args(args: &RunArgs) -> anyhow::Result<Self> {
        if args.concurrency == 0 {
            bail!("--concurrency must be a positive number");
        }
        if args.frequency == 0 {
            bail!("--frequency must be a positive number of seconds");
        }
        let procs = args.procs.unwrap_or_else(num_cpus::get);
        if procs == 0 {
            bail!("--procs must be a positive number");
        }

        let app_name = args.app_name.as_deref().unwrap_or(&args.workload);
        let dburl = with_application_name(&args.url, app_name)?;
        PostgresConnector::from_url(&dburl)?;

        let workload_args = load_workload_args(args.args.as_deref())?;

        Ok(Self {
            spec: WorkloadSpec {
                concurrency: args.concurrency,
                procs,
                ramp: args.ramp,
                iterations: iterations_per_worker(args.iterations, args.concurrency),
                duration: args.duration,
                conn_duration: args.conn_duration,
                autocommit: args.autocommit,
                dburl,
                workload: args.workload.clone(),
                args: workload_args,
            },
            frequency: Duration::from_secs(args.frequency),
            prom_port: args.prom_port,
            in_process: args.in_process,
            log_level: args.log_level.clone(),
        })
    }
}

/// Split a run-wide iteration count over the workers.
///
/// Every worker runs at least one cycle when a limit is set at all.
pub fn iterations_per_worker(total: u64, concurrency: usize) -> u64 {
    if total == 0 || concurrency == 0 {
        return total;
    }
    (total / concurrency as u64).max(1)
}

/// Add `application_name` to the URL unless it already carries one.
pub fn with_application_name(dburl: &str, app_name: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(dburl).with_context(|| "Failed to parse the database URL")?;
    if !matches!(url.scheme(), "postgres" | "postgresql") {
        bail!(
            "Unsupported database URL scheme '{}': expected postgres:// or postgresql://",
            url.scheme()
        );
    }
    if url.query_pairs().any(|(key, _)| key == APPLICATION_NAME) {
        return Ok(url.into());
    }
    // libpq-style URLs percent-decode values but do not treat '+' as a space.
    let encoded: String = url::form_urlencoded::byte_serialize(app_name.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => {
            format!("{existing}&{APPLICATION_NAME}={encoded}")
        }
        _ => format!("{APPLICATION_NAME}={encoded}"),
    };
    url.set_query(Some(&query));
    Ok(url.into())
}

/// Load workload arguments from an inline JSON/YAML document or a path to one.
///
/// YAML is a superset of JSON, so one parser handles both.
pub fn load_workload_args(source: Option<&str>) -> anyhow::Result<WorkloadArgs> {
    let Some(source) = source else {
        return Ok(WorkloadArgs::new());
    };

    let path = Path::new(source);
    let content = if path.is_file() {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workload arguments from {path:?}"))?
    } else {
        source.to_string()
    };
    if content.trim().is_empty() {
        return Ok(WorkloadArgs::new());
    }

    let value: serde_json::Value =
        serde_yaml::from_str(&content).with_context(|| "Failed to parse workload arguments")?;
    match value {
        serde_json::Value::Null => Ok(WorkloadArgs::new()),
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("Workload arguments must be a mapping, got {other}"),
    }
}
