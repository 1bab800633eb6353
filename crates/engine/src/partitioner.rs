//! Work partitioning across worker processes.
//!
//! Distributes the requested concurrency over the worker processes and
//! computes the ramp-up spacing between process launches.

use crate::error::ConfigError;
use std::time::Duration;

/// Partition `concurrency` workers across `procs` processes.
///
/// Every process gets `concurrency / procs` workers and the remainder is
/// handed out one by one to the first processes, so no two entries differ
/// by more than one. Processes that would get no worker at all (more
/// processes than workers) are left out.
pub fn threads_per_process(concurrency: usize, procs: usize) -> Result<Vec<usize>, ConfigError> {
    if concurrency == 0 {
        return Err(ConfigError::Concurrency(concurrency));
    }
    if procs == 0 {
        return Err(ConfigError::ProcessCount(procs));
    }

    let base = concurrency / procs;
    let remainder = concurrency % procs;

    Ok((0..procs)
        .map(|i| base + usize::from(i < remainder))
        .filter(|&workers| workers > 0)
        .collect())
}

/// Delay between two consecutive process launches.
pub fn ramp_interval(ramp: Duration, processes: usize) -> Duration {
    if processes == 0 || ramp.is_zero() {
        return Duration::ZERO;
    }
    ramp / processes as u32
}

/// Describe the partitioning plan for logging.
pub fn describe_partitioning(partition: &[usize], ramp: Duration) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Work distribution ({} workers over {} processes, ramp {:?}):",
        partition.iter().sum::<usize>(),
        partition.len(),
        ramp
    ));

    for (i, workers) in partition.iter().enumerate() {
        lines.push(format!("  process-{}: {} workers", i + 1, workers));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_equal_distribution() {
        assert_eq!(threads_per_process(6, 3).unwrap(), vec![2, 2, 2]);
    }

    #[test]
    fn test_partition_remainder_goes_to_first_processes() {
        assert_eq!(threads_per_process(11, 4).unwrap(), vec![3, 3, 3, 2]);
        assert_eq!(threads_per_process(4, 2).unwrap(), vec![2, 2]);
    }

    #[test]
    fn test_partition_more_processes_than_workers() {
        assert_eq!(threads_per_process(3, 8).unwrap(), vec![1, 1, 1]);
    }

    #[test]
    fn test_partition_sum_and_balance() {
        for concurrency in 1..=64 {
            for procs in 1..=16 {
                let partition = threads_per_process(concurrency, procs).unwrap();
                assert_eq!(partition.iter().sum::<usize>(), concurrency);
                let max = partition.iter().max().unwrap();
                let min = partition.iter().min().unwrap();
                assert!(max - min <= 1, "{concurrency}/{procs}: {partition:?}");
            }
        }
    }

    #[test]
    fn test_partition_rejects_zero() {
        assert_eq!(
            threads_per_process(0, 2),
            Err(ConfigError::Concurrency(0))
        );
        assert_eq!(
            threads_per_process(2, 0),
            Err(ConfigError::ProcessCount(0))
        );
    }

    #[test]
    fn test_ramp_interval() {
        assert_eq!(
            ramp_interval(Duration::from_secs(10), 4),
            Duration::from_millis(2500)
        );
        assert_eq!(ramp_interval(Duration::ZERO, 4), Duration::ZERO);
        assert_eq!(ramp_interval(Duration::from_secs(10), 0), Duration::ZERO);
    }

    #[test]
    fn test_describe_partitioning() {
        let description = describe_partitioning(&[2, 1], Duration::from_secs(3));
        assert!(description.contains("3 workers over 2 processes"));
        assert!(description.contains("process-1: 2 workers"));
        assert!(description.contains("process-2: 1 workers"));
    }
}
