//! Key-value workload.
//!
//! Every cycle picks one operation (read, update or write) according to the
//! configured percentages and runs it `cycle_size` times, each followed by a
//! think pause. Keys written by this worker are kept in a bounded pool that
//! reads and updates draw from.

mod args;
mod value;

pub use args::{ColumnType, KvArgs, WriteMode};
pub use value::KvValue;

use async_trait::async_trait;
use pgworkload_engine::{ConfigError, DbError, Transaction, Workload, WorkloadArgs};
use pgworkload_postgresql::{to_db_error, PgSession};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tracing::debug;

/// Registry name of this workload.
pub const WORKLOAD_NAME: &str = "kv";

pub const READ_LABEL: &str = "read_kv";
pub const UPDATE_LABEL: &str = "update_kv";
pub const WRITE_LABEL: &str = "write_kv";
pub const THINK_LABEL: &str = "__think__";

/// [`pgworkload_engine::WorkloadFactory`] for the key-value workload.
pub fn factory(args: &WorkloadArgs) -> Result<Box<dyn Workload<PgSession>>, ConfigError> {
    Ok(Box::new(KvWorkload::new(KvArgs::parse(args)?)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Update,
    Write,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Operation::Read => READ_LABEL,
            Operation::Update => UPDATE_LABEL,
            Operation::Write => WRITE_LABEL,
        }
    }
}

/// Bounded pool of recently written keys, oldest evicted first.
struct KeyPool {
    keys: Mutex<VecDeque<KvValue>>,
    capacity: usize,
}

impl KeyPool {
    fn new(seed: KvValue, capacity: usize) -> Self {
        Self {
            keys: Mutex::new(VecDeque::from([seed])),
            capacity,
        }
    }

    fn push(&self, key: KvValue) {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.push_back(key);
        while keys.len() > self.capacity {
            keys.pop_front();
        }
    }

    fn choose(&self) -> Option<KvValue> {
        let keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        let index = rand::rng().random_range(0..keys.len().max(1));
        keys.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// State shared by one worker's workload and its transactions.
struct KvState {
    args: KvArgs,
    keys: KeyPool,
    read_sql: String,
    update_sql: String,
    write_sql: String,
}

pub struct KvWorkload {
    state: Arc<KvState>,
}

impl KvWorkload {
    pub fn new(args: KvArgs) -> Self {
        let seed = KvValue::random(&mut rand::rng(), args.key_type, args.key_size);
        let state = KvState {
            keys: KeyPool::new(seed, args.key_pool_size),
            read_sql: format!("SELECT * FROM {} WHERE k = $1", args.table_name),
            update_sql: format!("UPDATE {} SET v = $1 WHERE k = $2", args.table_name),
            write_sql: write_statement(&args),
            args,
        };
        debug!("KV write statement: {}", state.write_sql);
        Self {
            state: Arc::new(state),
        }
    }

    /// Pick the operation for the next cycle from a uniform draw in [0, 1).
    pub fn pick(&self, draw: f64) -> Operation {
        let args = &self.state.args;
        if draw < args.read_pct {
            Operation::Read
        } else if draw < args.read_pct + args.update_pct {
            Operation::Update
        } else {
            Operation::Write
        }
    }

    pub fn key_pool_len(&self) -> usize {
        self.state.keys.len()
    }
}

impl Workload<PgSession> for KvWorkload {
    fn cycle(&mut self) -> Vec<Box<dyn Transaction<PgSession>>> {
        let op = self.pick(rand::rng().random());
        let think = self.state.args.think_time;

        let mut txns: Vec<Box<dyn Transaction<PgSession>>> =
            Vec::with_capacity(self.state.args.cycle_size * 2);
        for _ in 0..self.state.args.cycle_size {
            txns.push(Box::new(KvTransaction {
                op,
                state: Arc::clone(&self.state),
            }));
            txns.push(Box::new(Think { duration: think }));
        }
        txns
    }
}

/// `INSERT INTO t (k, v) VALUES ($1, $2), ($3, $4), ...`, adjusted for the write mode.
fn write_statement(args: &KvArgs) -> String {
    let rows: Vec<String> = (0..args.batch_size)
        .map(|i| format!("(${}, ${})", 2 * i + 1, 2 * i + 2))
        .collect();
    format!(
        "{} INTO {} (k, v) VALUES {}{}",
        args.write_mode.command(),
        args.table_name,
        rows.join(", "),
        args.write_mode.suffix()
    )
}

struct KvTransaction {
    op: Operation,
    state: Arc<KvState>,
}

impl KvTransaction {
    fn random_value(&self) -> KvValue {
        let args = &self.state.args;
        KvValue::random(&mut rand::rng(), args.value_type, args.value_size)
    }

    fn pooled_key(&self) -> Result<KvValue, DbError> {
        self.state
            .keys
            .choose()
            .ok_or_else(|| DbError::other("key pool is empty"))
    }

    async fn read(&self, session: &mut PgSession) -> Result<(), DbError> {
        let key = self.pooled_key()?;
        session
            .client()
            .query(self.state.read_sql.as_str(), &[key.as_sql()])
            .await
            .map_err(to_db_error)?;
        Ok(())
    }

    async fn update(&self, session: &mut PgSession) -> Result<(), DbError> {
        let value = self.random_value();
        let key = self.pooled_key()?;
        session
            .client()
            .execute(self.state.update_sql.as_str(), &[value.as_sql(), key.as_sql()])
            .await
            .map_err(to_db_error)?;
        Ok(())
    }

    async fn write(&self, session: &mut PgSession) -> Result<(), DbError> {
        let args = &self.state.args;
        let mut rows = Vec::with_capacity(args.batch_size * 2);
        for _ in 0..args.batch_size {
            let key = KvValue::random(&mut rand::rng(), args.key_type, args.key_size);
            self.state.keys.push(key.clone());
            rows.push(key);
            rows.push(self.random_value());
        }

        let params: Vec<&(dyn ToSql + Sync)> = rows.iter().map(KvValue::as_sql).collect();
        session
            .client()
            .execute(self.state.write_sql.as_str(), &params)
            .await
            .map_err(to_db_error)?;
        Ok(())
    }
}

#[async_trait]
impl Transaction<PgSession> for KvTransaction {
    fn name(&self) -> &str {
        self.op.label()
    }

    async fn run(&self, session: &mut PgSession) -> Result<(), DbError> {
        match self.op {
            Operation::Read => self.read(session).await,
            Operation::Update => self.update(session).await,
            Operation::Write => self.write(session).await,
        }
    }
}

/// Pause between operations, reported under its own label.
struct Think {
    duration: Duration,
}

#[async_trait]
impl Transaction<PgSession> for Think {
    fn name(&self) -> &str {
        THINK_LABEL
    }

    async fn run(&self, _session: &mut PgSession) -> Result<(), DbError> {
        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }
        Ok(())
    }
}
