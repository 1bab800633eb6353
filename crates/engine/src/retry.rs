//! Transaction execution with retry on serialization failures.

use crate::error::{DbError, ErrorKind};
use crate::session::Session;
use crate::workload::Transaction;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Attempts made before a contended transaction is reported as failed.
pub const MAX_RETRIES: u32 = 3;

/// Run `txn` on `session`, retrying on serialization failures.
///
/// Outside autocommit mode the transaction is wrapped in BEGIN/COMMIT and
/// rolled back on failure. Serialization failures back off exponentially
/// with jitter and are retried up to [`MAX_RETRIES`] times; every other
/// error is returned immediately.
pub async fn run_transaction<S: Session>(
    session: &mut S,
    txn: &dyn Transaction<S>,
    autocommit: bool,
) -> Result<(), DbError> {
    for attempt in 1..=MAX_RETRIES {
        match attempt_once(session, txn, autocommit).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind == ErrorKind::Serialization => {
                if attempt == MAX_RETRIES {
                    debug!(
                        "Transaction '{}' hit a serialization failure on its last attempt: {}",
                        txn.name(),
                        e.message
                    );
                    break;
                }
                let delay = backoff_delay(attempt);
                debug!(
                    "Transaction '{}' hit a serialization failure (attempt {}/{}): {}. Retrying in {:?}",
                    txn.name(),
                    attempt,
                    MAX_RETRIES,
                    e.message,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(DbError::other(format!(
        "Transaction '{}' did not succeed after {} retries",
        txn.name(),
        MAX_RETRIES
    )))
}

async fn attempt_once<S: Session>(
    session: &mut S,
    txn: &dyn Transaction<S>,
    autocommit: bool,
) -> Result<(), DbError> {
    if autocommit {
        return txn.run(session).await;
    }

    session.begin().await?;
    let result = match txn.run(session).await {
        Ok(()) => session.commit().await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        if let Err(rollback_err) = session.rollback().await {
            debug!("Rollback after '{}' failed: {}", e.message, rollback_err);
        }
    }
    result
}

fn backoff_delay(attempt: u32) -> Duration {
    let jitter: f64 = rand::rng().random_range(0.5..1.5);
    Duration::from_secs_f64(2f64.powi(attempt as i32) * 0.1 * jitter)
}
