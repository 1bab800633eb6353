//! Workloads available to `pgworkload run --workload <name>`.

use pgworkload_engine::WorkloadRegistry;
use pgworkload_postgresql::PgSession;

pub fn workloads() -> WorkloadRegistry<PgSession> {
    WorkloadRegistry::new().register(pgworkload_kv::WORKLOAD_NAME, pgworkload_kv::factory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgworkload_engine::ConfigError;

    #[test]
    fn test_kv_is_registered() {
        let registry = workloads();
        assert_eq!(registry.names(), vec!["kv"]);
        assert!(registry.get("KV").is_ok());
    }

    #[test]
    fn test_unknown_workload_lists_available() {
        match workloads().get("tpcc") {
            Err(ConfigError::UnknownWorkload { name, available }) => {
                assert_eq!(name, "tpcc");
                assert_eq!(available, "kv");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("tpcc is not registered"),
        }
    }
}
