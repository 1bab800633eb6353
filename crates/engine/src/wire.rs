//! Line protocol between the coordinator and worker child processes.
//!
//! Both directions carry one JSON document per line. The parent writes
//! [`ControlMessage`]s to the child's stdin, starting with exactly one
//! `start`; the child writes [`WorkerMessage`]s to its stdout.

use crate::sample::Sample;
use crate::spec::WorkloadSpec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// What a worker process needs to know to start its workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerBootstrap {
    /// Process worker index, used in worker ids.
    pub index: usize,
    /// Leaf workers to run.
    pub workers: usize,
    pub spec: WorkloadSpec,
}

/// Parent to child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMessage {
    Start(Box<WorkerBootstrap>),
    /// One poison pill.
    Stop,
}

/// Child to parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMessage {
    Sample(Sample),
    /// A worker took a poison pill and stopped.
    Ack,
}

/// Encode a message as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Duration;

    #[test]
    fn test_worker_message_layout() {
        let line = encode_line(&WorkerMessage::Sample(Sample::timing(
            "read_kv",
            Duration::from_millis(2),
        )))
        .unwrap();
        assert_eq!(
            line,
            "{\"sample\":{\"type\":\"timing\",\"label\":\"read_kv\",\"elapsed_secs\":0.002}}\n"
        );
        assert_eq!(encode_line(&WorkerMessage::Ack).unwrap(), "\"ack\"\n");
    }

    #[test]
    fn test_decode_error_sample() {
        let message: WorkerMessage = decode_line(
            "{\"sample\":{\"type\":\"error\",\"kind\":\"schema_missing\",\"detail\":\"relation \\\"kv\\\" does not exist\"}}\n",
        )
        .unwrap();
        assert_eq!(
            message,
            WorkerMessage::Sample(Sample::error(
                ErrorKind::SchemaMissing,
                "relation \"kv\" does not exist"
            ))
        );
    }

    #[test]
    fn test_stop_is_a_bare_string() {
        assert_eq!(encode_line(&ControlMessage::Stop).unwrap(), "\"stop\"\n");
        assert_eq!(
            decode_line::<ControlMessage>("\"stop\"").unwrap(),
            ControlMessage::Stop
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_line::<WorkerMessage>("not json").is_err());
        assert!(decode_line::<ControlMessage>("{\"start\":{}}").is_err());
    }
}
