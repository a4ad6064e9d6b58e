//! Queued operation types.
//!
//! Local writes are recorded as operations rather than sent directly, so they
//! can be replayed against the remote store once it is reachable.

use crate::{Fields, LocalId, PendingAction, QueueId, RemoteId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<OperationType> for PendingAction {
    fn from(op: OperationType) -> Self {
        match op {
            OperationType::Create => PendingAction::Create,
            OperationType::Update => PendingAction::Update,
            OperationType::Delete => PendingAction::Delete,
        }
    }
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Queue key, assigned on enqueue
    pub queue_id: QueueId,
    /// What to do remotely
    pub operation_type: OperationType,
    /// The cached record this operation applies to
    pub target_local_id: LocalId,
    /// Remote id of the target, once known
    pub target_remote_id: Option<RemoteId>,
    /// Sanitized entity fields to send
    pub payload: Fields,
    /// Enqueue time, used for FIFO ordering
    pub created_at: Timestamp,
}

impl QueuedOperation {
    /// Create a create operation.
    pub fn create(target_local_id: LocalId, payload: Fields, created_at: Timestamp) -> Self {
        Self {
            queue_id: 0,
            operation_type: OperationType::Create,
            target_local_id,
            target_remote_id: None,
            payload,
            created_at,
        }
    }

    /// Create an update operation.
    pub fn update(
        target_local_id: LocalId,
        target_remote_id: Option<RemoteId>,
        payload: Fields,
        created_at: Timestamp,
    ) -> Self {
        Self {
            queue_id: 0,
            operation_type: OperationType::Update,
            target_local_id,
            target_remote_id,
            payload,
            created_at,
        }
    }

    /// Create a delete operation.
    pub fn delete(
        target_local_id: LocalId,
        target_remote_id: Option<RemoteId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            queue_id: 0,
            operation_type: OperationType::Delete,
            target_local_id,
            target_remote_id,
            payload: Fields::new(),
            created_at,
        }
    }

    /// Replay order: enqueue time, then queue id.
    pub fn fifo_key(&self) -> (Timestamp, QueueId) {
        (self.created_at, self.queue_id)
    }
}
