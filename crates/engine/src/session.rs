//! Database connection contract.
//!
//! A [`Connector`] opens one [`Session`] per worker. Sessions are released
//! by dropping them, which the worker does on every exit path.

use crate::error::DbError;
use async_trait::async_trait;

/// An open database session owned by exactly one worker.
#[async_trait]
pub trait Session: Send + 'static {
    /// Start an explicit transaction.
    async fn begin(&mut self) -> Result<(), DbError>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<(), DbError>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<(), DbError>;
}

/// Opens sessions against the database under test.
///
/// Errors must already be classified (see [`crate::ErrorKind`]); the
/// worker uses the kind alone to decide between retrying and giving up.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    async fn connect(&self) -> Result<Self::Session, DbError>;
}
