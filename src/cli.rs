//! CLI argument definitions for pgworkload.

use crate::config::duration::parse_duration;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

/// Concurrent workload generator for PostgreSQL-compatible databases.
#[derive(Parser)]
#[command(name = "pgworkload")]
#[command(about = "Run database workloads and report throughput and latency")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workload against a database
    Run(RunArgs),

    /// Run one worker process (started by `run`)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for the run command.
#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Workload to run (e.g. kv)
    #[arg(long, short = 'w', env = "PGWORKLOAD_WORKLOAD")]
    pub workload: String,

    /// Database connection URL; must name a database
    #[arg(
        long,
        env = "PGWORKLOAD_URL",
        default_value = "postgres://root@localhost:26257/defaultdb?sslmode=disable"
    )]
    pub url: String,

    /// Number of concurrent workers (database sessions)
    #[arg(long, short = 'c', default_value_t = 1)]
    pub concurrency: usize,

    /// Number of worker processes (default: CPU count)
    #[arg(long, short = 'x')]
    pub procs: Option<usize>,

    /// Time over which worker processes are started (e.g. 30s, 5m)
    #[arg(long, short = 'r', value_parser = parse_duration, default_value = "0")]
    pub ramp: Duration,

    /// Total iterations across all workers; 0 means unlimited
    #[arg(long, short = 'i', default_value_t = 0)]
    pub iterations: u64,

    /// Run duration (e.g. 300, 300s, 30m, 1h); 0 means unlimited
    #[arg(long, short = 'd', value_parser = parse_duration, default_value = "0")]
    pub duration: Duration,

    /// Reconnect each worker after this long; 0 keeps the connection
    #[arg(long, short = 'k', value_parser = parse_duration, default_value = "0")]
    pub conn_duration: Duration,

    /// Seconds between statistics reports
    #[arg(long, short = 's', default_value_t = 10)]
    pub frequency: u64,

    /// Serve Prometheus metrics on this port
    #[arg(long, short = 'p', env = "PGWORKLOAD_PROM_PORT")]
    pub prom_port: Option<u16>,

    /// Workload arguments as a JSON or YAML string, or a path to such a file
    #[arg(long, short = 'a')]
    pub args: Option<String>,

    /// application_name for the connections (default: the workload name)
    #[arg(long, short = 'n')]
    pub app_name: Option<String>,

    /// Run every statement in its own implicit transaction
    #[arg(long)]
    pub autocommit: bool,

    /// Run process workers as threads of this process
    #[arg(long)]
    pub in_process: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, short = 'l', default_value = "info")]
    pub log_level: String,
}

/// Arguments for the hidden worker command.
#[derive(Args, Clone, Debug)]
pub struct WorkerArgs {
    /// Runtime worker threads, one per leaf worker
    #[arg(long, default_value_t = 1)]
    pub threads: usize,
}
