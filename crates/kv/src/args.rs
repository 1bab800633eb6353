//! Arguments of the key-value workload.

use pgworkload_engine::workload::{arg_f64, arg_str, arg_u64};
use pgworkload_engine::{ConfigError, WorkloadArgs};
use std::time::Duration;

/// Column types a key or value can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bytes,
    Uuid,
    Int,
    String,
}

impl ColumnType {
    fn parse(name: &str, value: &str) -> Result<Self, ConfigError> {
        match value {
            "bytes" => Ok(ColumnType::Bytes),
            "uuid" => Ok(ColumnType::Uuid),
            "int" => Ok(ColumnType::Int),
            "string" => Ok(ColumnType::String),
            other => Err(ConfigError::invalid_argument(
                name,
                format!(
                    "The selected {name} '{other}' is invalid. The possible values are 'bytes', 'uuid', 'int', 'string'."
                ),
            )),
        }
    }
}

/// How new rows are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Plain `INSERT`; duplicate keys fail.
    Insert,
    /// `UPSERT`, as understood by CockroachDB.
    Upsert,
    /// `INSERT ... ON CONFLICT DO NOTHING`.
    DoNothing,
}

impl WriteMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "insert" => Ok(WriteMode::Insert),
            "upsert" => Ok(WriteMode::Upsert),
            "do_nothing" => Ok(WriteMode::DoNothing),
            other => Err(ConfigError::invalid_argument(
                "write_mode",
                format!(
                    "The selected write_mode '{other}' is invalid. The possible values are 'insert', 'upsert', 'do_nothing'."
                ),
            )),
        }
    }

    pub fn command(self) -> &'static str {
        match self {
            WriteMode::Upsert => "UPSERT",
            WriteMode::Insert | WriteMode::DoNothing => "INSERT",
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            WriteMode::DoNothing => " ON CONFLICT DO NOTHING",
            WriteMode::Insert | WriteMode::Upsert => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KvArgs {
    /// Pause after every operation.
    pub think_time: Duration,
    /// Rows per write statement.
    pub batch_size: usize,
    /// Operations per cycle.
    pub cycle_size: usize,
    pub table_name: String,
    /// Key size in bytes (or characters) for `bytes` and `string` keys.
    pub key_size: usize,
    pub value_size: usize,
    pub key_type: ColumnType,
    pub value_type: ColumnType,
    /// Share of cycles that read, in [0, 1].
    pub read_pct: f64,
    /// Share of cycles that update, in [0, 1].
    pub update_pct: f64,
    /// Most recent written keys kept for reads and updates.
    pub key_pool_size: usize,
    pub write_mode: WriteMode,
}

impl KvArgs {
    pub fn parse(args: &WorkloadArgs) -> Result<Self, ConfigError> {
        if args.get("seed").is_some_and(|seed| !seed.is_null()) {
            return Err(ConfigError::invalid_argument(
                "seed",
                "seeded key generation is not supported",
            ));
        }

        let think_ms = arg_f64(args, "think_time", 10.0)?;
        if !(think_ms.is_finite() && think_ms >= 0.0) {
            return Err(ConfigError::invalid_argument(
                "think_time",
                "must be a non-negative number of milliseconds",
            ));
        }

        let read_pct = percentage(args, "read_pct")?;
        let update_pct = percentage(args, "update_pct")?;
        if read_pct + update_pct > 1.0 {
            return Err(ConfigError::invalid_argument(
                "update_pct",
                "read_pct and update_pct must not add up to more than 100",
            ));
        }

        let table_name = arg_str(args, "table_name", "kv")?;
        if !is_identifier(&table_name) {
            return Err(ConfigError::invalid_argument(
                "table_name",
                format!("'{table_name}' is not a valid table name"),
            ));
        }

        Ok(Self {
            think_time: Duration::from_secs_f64(think_ms / 1000.0),
            batch_size: positive(args, "batch_size", 1)?,
            cycle_size: positive(args, "cycle_size", 1)?,
            table_name,
            key_size: positive(args, "key_size", 32)?,
            value_size: positive(args, "value_size", 256)?,
            key_type: ColumnType::parse("key_type", &arg_str(args, "key_type", "bytes")?)?,
            value_type: ColumnType::parse("value_type", &arg_str(args, "value_type", "bytes")?)?,
            read_pct,
            update_pct,
            key_pool_size: positive(args, "key_pool_size", 10_000)?,
            write_mode: WriteMode::parse(&arg_str(args, "write_mode", "insert")?)?,
        })
    }
}

fn percentage(args: &WorkloadArgs, name: &str) -> Result<f64, ConfigError> {
    let pct = arg_f64(args, name, 0.0)?;
    if !(0.0..=100.0).contains(&pct) {
        return Err(ConfigError::invalid_argument(name, "must be between 0 and 100"));
    }
    Ok(pct / 100.0)
}

fn positive(args: &WorkloadArgs, name: &str, default: u64) -> Result<usize, ConfigError> {
    match arg_u64(args, name, default)? {
        0 => Err(ConfigError::invalid_argument(name, "must be at least 1")),
        n => usize::try_from(n).map_err(|_| ConfigError::invalid_argument(name, "too large")),
    }
}

/// Plain or schema-qualified SQL identifier.
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
