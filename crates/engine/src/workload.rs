//! Workload contract and registry.
//!
//! A workload produces, for every cycle, an ordered list of named
//! transactions. Each worker owns its own workload instance, built from the
//! run's argument bundle by a [`WorkloadFactory`] looked up by name in a
//! [`WorkloadRegistry`].

use crate::error::{ConfigError, DbError};
use crate::session::Session;
use async_trait::async_trait;
use serde_json::Value;

/// Key-value arguments handed to a workload constructor.
pub type WorkloadArgs = serde_json::Map<String, Value>;

/// A named unit of work run against one session.
///
/// The name is the stats label; it must be stable across cycles.
#[async_trait]
pub trait Transaction<S: Send>: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, session: &mut S) -> Result<(), DbError>;
}

/// Produces the transaction sequence for one cycle.
pub trait Workload<S: Session>: Send {
    fn cycle(&mut self) -> Vec<Box<dyn Transaction<S>>>;
}

/// Builds a workload instance from the run's arguments.
pub type WorkloadFactory<S> = fn(&WorkloadArgs) -> Result<Box<dyn Workload<S>>, ConfigError>;

/// Static table of workload constructors, keyed by workload name.
pub struct WorkloadRegistry<S: Session> {
    entries: Vec<(&'static str, WorkloadFactory<S>)>,
}

impl<S: Session> Default for WorkloadRegistry<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<S: Session> WorkloadRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: &'static str, factory: WorkloadFactory<S>) -> Self {
        self.entries.retain(|(existing, _)| *existing != name);
        self.entries.push((name, factory));
        self
    }

    pub fn get(&self, name: &str) -> Result<WorkloadFactory<S>, ConfigError> {
        self.entries
            .iter()
            .find(|(registered, _)| registered.eq_ignore_ascii_case(name))
            .map(|(_, factory)| *factory)
            .ok_or_else(|| ConfigError::UnknownWorkload {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }
}

/// Read an optional numeric argument.
pub fn arg_f64(args: &WorkloadArgs, name: &str, default: f64) -> Result<f64, ConfigError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ConfigError::invalid_argument(name, "not a finite number")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ConfigError::invalid_argument(name, format!("'{s}' is not a number"))),
        Some(other) => Err(ConfigError::invalid_argument(
            name,
            format!("expected a number, got {other}"),
        )),
    }
}

/// Read an optional non-negative integer argument.
pub fn arg_u64(args: &WorkloadArgs, name: &str, default: u64) -> Result<u64, ConfigError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            ConfigError::invalid_argument(name, format!("expected a non-negative integer, got {n}"))
        }),
        Some(Value::String(s)) => s.trim().parse::<u64>().map_err(|_| {
            ConfigError::invalid_argument(name, format!("'{s}' is not a non-negative integer"))
        }),
        Some(other) => Err(ConfigError::invalid_argument(
            name,
            format!("expected an integer, got {other}"),
        )),
    }
}

/// Read an optional string argument.
pub fn arg_str(args: &WorkloadArgs, name: &str, default: &str) -> Result<String, ConfigError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ConfigError::invalid_argument(
            name,
            format!("expected a string, got {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_factory, MemorySession};
    use serde_json::json;

    fn args(value: Value) -> WorkloadArgs {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let registry =
            WorkloadRegistry::<MemorySession>::new().register("scripted", scripted_factory);
        assert!(registry.get("Scripted").is_ok());
        assert_eq!(registry.names(), vec!["scripted"]);
    }

    #[test]
    fn test_registry_unknown_workload_lists_available() {
        let registry =
            WorkloadRegistry::<MemorySession>::new().register("scripted", scripted_factory);
        match registry.get("tpcc") {
            Err(ConfigError::UnknownWorkload { name, available }) => {
                assert_eq!(name, "tpcc");
                assert_eq!(available, "scripted");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected lookup to fail"),
        }
    }

    #[test]
    fn test_arg_readers() {
        let a = args(json!({"think_time": 5, "pct": "12.5", "name": "kv", "bad": [1]}));
        assert_eq!(arg_f64(&a, "think_time", 10.0).unwrap(), 5.0);
        assert_eq!(arg_f64(&a, "pct", 0.0).unwrap(), 12.5);
        assert_eq!(arg_f64(&a, "missing", 3.0).unwrap(), 3.0);
        assert_eq!(arg_u64(&a, "think_time", 1).unwrap(), 5);
        assert_eq!(arg_str(&a, "name", "x").unwrap(), "kv");
        assert_eq!(arg_str(&a, "missing", "x").unwrap(), "x");
        assert!(arg_f64(&a, "bad", 0.0).is_err());
        assert!(arg_u64(&a, "name", 0).is_err());
        assert!(arg_str(&a, "think_time", "").is_err());
    }
}
