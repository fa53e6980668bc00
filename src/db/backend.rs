use std::sync::Arc;

use async_trait::async_trait;

use super::types::{BatchStatement, PoolStatus, QueryOutput};
use crate::{config::DatabaseConfig, db::SqlValue, error::DbError};

/// A pooled connection to the backing store.
///
/// Implementations own pool acquisition and enforce the command timeout on
/// every operation, cancelling the server-side query when the wait is
/// abandoned.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run one parameterized statement on a pooled connection
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput, DbError>;

    /// Run all statements on one connection inside a single transaction.
    ///
    /// Any failure rolls back the whole batch.
    async fn transaction(&self, statements: &[BatchStatement])
    -> Result<Vec<QueryOutput>, DbError>;

    /// Current pool occupancy
    fn status(&self) -> PoolStatus;

    /// Release every pooled connection
    async fn close(&self);
}

/// Builds a [`Backend`] from connection parameters.
///
/// The connection manager calls this once per `initialize()`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &DatabaseConfig) -> Result<Arc<dyn Backend>, DbError>;
}
