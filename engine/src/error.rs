//! Error types for the Harbor engine.

use crate::{LocalId, TableName};
use thiserror::Error;

/// All possible errors from the Harbor engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lookup errors
    #[error("record not found: {0}")]
    RecordNotFound(String),

    // Validation errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("record {0} is pending deletion")]
    RecordPendingDelete(LocalId),

    // Sync errors
    #[error("cannot update without a remote id (local id {0})")]
    MissingRemoteId(LocalId),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("table mismatch: expected {expected}, got {actual}")]
    TableMismatch {
        expected: TableName,
        actual: TableName,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
