//! Remote store abstraction.
//!
//! The sync runner and snapshot loader only talk to the remote through
//! [`RemoteStore`], so tests swap in [`MemoryRemote`] for [`PostgresRemote`].

mod memory;
mod postgres;

pub use memory::MemoryRemote;
pub use postgres::{quote_ident, PostgresRemote};

use async_trait::async_trait;
use harbor_engine::{Fields, OrderBy, RemoteId, RemoteTable, Scope};
use std::fmt;

/// Errors from the remote store.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote store unreachable: {0}")]
    Unreachable(String),

    #[error("remote row not found: {0}")]
    NotFound(String),

    #[error("remote store rejected the request: {0}")]
    Rejected(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RemoteError {
    /// Whether the failure means the remote could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_))
    }

    /// Sort a driver error into transport, missing-row and rejection cases.
    pub fn classify(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => RemoteError::Unreachable(err.to_string()),
            sqlx::Error::RowNotFound => RemoteError::NotFound(err.to_string()),
            sqlx::Error::Database(db) => RemoteError::Rejected(db.message().to_string()),
            other => RemoteError::Database(other),
        }
    }
}

/// Async access to the remote tables.
///
/// Rows travel as JSON objects that include the id column.
#[async_trait]
pub trait RemoteStore: Send + Sync + fmt::Debug {
    /// Fetch every row of a table, optionally scoped and ordered.
    async fn select(
        &self,
        table: &RemoteTable,
        scope: Option<&Scope>,
        order: Option<&OrderBy>,
    ) -> Result<Vec<serde_json::Value>, RemoteError>;

    /// Insert a row and return it as stored.
    async fn insert(
        &self,
        table: &RemoteTable,
        payload: &Fields,
    ) -> Result<serde_json::Value, RemoteError>;

    /// Update a row and return it as stored.
    async fn update(
        &self,
        table: &RemoteTable,
        id: &RemoteId,
        payload: &Fields,
    ) -> Result<serde_json::Value, RemoteError>;

    /// Delete a row. A missing row is reported as [`RemoteError::NotFound`].
    async fn delete(&self, table: &RemoteTable, id: &RemoteId) -> Result<(), RemoteError>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), RemoteError>;
}
