//! The mutation queue.
//!
//! Append-only and drained in FIFO order. Operations leave the queue only when
//! the host confirms them (or when a record is purged outright).

use crate::{LocalId, QueueId, QueuedOperation, RemoteId};
use std::collections::BTreeMap;

/// Ordered, durable list of pending operations.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationQueue {
    ops: BTreeMap<QueueId, QueuedOperation>,
    next_queue_id: QueueId,
}

impl Default for MutationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            ops: BTreeMap::new(),
            next_queue_id: 1,
        }
    }

    /// Rebuild a queue from persisted operations. The id counter never goes
    /// backwards past an id already handed out.
    pub fn from_parts(ops: Vec<QueuedOperation>, next_queue_id: QueueId) -> Self {
        let highest = ops.iter().map(|op| op.queue_id).max().unwrap_or(0);
        Self {
            ops: ops.into_iter().map(|op| (op.queue_id, op)).collect(),
            next_queue_id: next_queue_id.max(highest + 1),
        }
    }

    /// Append an operation and return its queue id.
    pub fn enqueue(&mut self, mut op: QueuedOperation) -> QueueId {
        let queue_id = self.next_queue_id;
        self.next_queue_id += 1;
        op.queue_id = queue_id;
        self.ops.insert(queue_id, op);
        queue_id
    }

    /// All pending operations in replay order.
    pub fn peek_all(&self) -> Vec<QueuedOperation> {
        let mut ops: Vec<_> = self.ops.values().cloned().collect();
        ops.sort_by_key(QueuedOperation::fifo_key);
        ops
    }

    /// Get an operation by queue id.
    pub fn get(&self, queue_id: QueueId) -> Option<&QueuedOperation> {
        self.ops.get(&queue_id)
    }

    /// Delete one completed operation.
    pub fn remove(&mut self, queue_id: QueueId) -> Option<QueuedOperation> {
        self.ops.remove(&queue_id)
    }

    /// Delete every operation targeting a record. Returns how many were removed.
    pub fn remove_for_local(&mut self, local_id: LocalId) -> usize {
        let before = self.ops.len();
        self.ops.retain(|_, op| op.target_local_id != local_id);
        before - self.ops.len()
    }

    /// Fill in the remote id for operations queued before the record's
    /// create was confirmed.
    pub fn assign_remote_id(&mut self, local_id: LocalId, remote_id: &RemoteId) -> usize {
        let mut assigned = 0;
        for op in self.ops.values_mut() {
            if op.target_local_id == local_id && op.target_remote_id.is_none() {
                op.target_remote_id = Some(remote_id.clone());
                assigned += 1;
            }
        }
        assigned
    }

    /// Point operations at a different record.
    pub fn retarget(&mut self, from: LocalId, to: LocalId) -> usize {
        let mut moved = 0;
        for op in self.ops.values_mut() {
            if op.target_local_id == from {
                op.target_local_id = to;
                moved += 1;
            }
        }
        moved
    }

    /// The earliest pending operation for a record.
    pub fn next_for(&self, local_id: LocalId) -> Option<&QueuedOperation> {
        self.ops
            .values()
            .filter(|op| op.target_local_id == local_id)
            .min_by_key(|op| op.fifo_key())
    }

    /// Whether a record has operations waiting.
    pub fn has_pending_for(&self, local_id: LocalId) -> bool {
        self.ops.values().any(|op| op.target_local_id == local_id)
    }

    /// Next id to be handed out.
    pub fn next_queue_id(&self) -> QueueId {
        self.next_queue_id
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
