//! Concurrent execution engine for pgworkload.
//!
//! The engine drives a fixed number of database sessions ("leaf workers")
//! spread over a set of worker processes, runs workload cycles on each of
//! them and turns the resulting stream of timing samples into windowed
//! latency and throughput reports.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────────────────────┐
//!                │               Coordinator                │
//!                │  ramp-up · stats windows · shutdown      │
//!                └──────────────────────────────────────────┘
//!                   ▲ metrics (bounded)   │ stop pills   ▲ acks
//!                   │                     ▼              │
//!        ┌─────────────────────┐    ┌─────────────────────┐
//!        │  Process worker 1   │    │  Process worker N   │
//!        │  ┌──────┐ ┌──────┐  │    │  ┌──────┐ ┌──────┐  │
//!        │  │worker│ │worker│  │    │  │worker│ │worker│  │
//!        │  └──────┘ └──────┘  │    │  └──────┘ └──────┘  │
//!        └─────────────────────┘    └─────────────────────┘
//!                   │ one session per worker │
//!                   ▼                        ▼
//!                ┌──────────────────────────────────────────┐
//!                │                 Database                 │
//!                └──────────────────────────────────────────┘
//! ```
//!
//! Process workers are either real child processes ([`SubprocessLauncher`])
//! or dedicated OS threads with their own runtime ([`ThreadLauncher`]).
//! Workloads plug in through [`Workload`] and [`Transaction`], databases
//! through [`Connector`] and [`Session`].

pub mod control;
pub mod coordinator;
pub mod error;
pub mod exporter;
pub mod launcher;
pub mod partitioner;
pub mod retry;
pub mod sample;
pub mod session;
pub mod spec;
pub mod stats;
pub mod subprocess;
pub mod testing;
pub mod wire;
pub mod worker;
pub mod workload;

pub use control::{AckSender, ControlPlane, MetricsSender, Termination, WorkerChannels};
pub use coordinator::{Coordinator, RunFailure, RunOutcome, RunStatus};
pub use error::{ConfigError, DbError, ErrorKind};
pub use exporter::Exporter;
pub use launcher::{Launcher, ThreadLauncher};
pub use partitioner::{describe_partitioning, ramp_interval, threads_per_process};
pub use retry::run_transaction;
pub use sample::{Sample, CYCLE_LABEL};
pub use session::{Connector, Session};
pub use spec::WorkloadSpec;
pub use stats::{LabelStats, Stats, StatsReport};
pub use subprocess::{serve_worker_process, SubprocessLauncher};
pub use worker::{Limits, ProcessWorker, Worker, WorkerSettings};
pub use workload::{Transaction, Workload, WorkloadArgs, WorkloadFactory, WorkloadRegistry};
