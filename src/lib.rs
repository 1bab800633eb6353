//! pgworkload
//!
//! Runs database workloads with many concurrent sessions spread over
//! several worker processes and reports throughput and latency per
//! transaction while the run progresses.
//!
//! ```bash
//! # 64 sessions over 4 processes for ten minutes, half reads
//! pgworkload run --workload kv --url postgres://root@localhost:26257/bank \
//!     --concurrency 64 --procs 4 --duration 10m --args '{"read_pct": 50}'
//! ```

pub mod cli;
pub mod config;
pub mod registry;
pub mod run;
