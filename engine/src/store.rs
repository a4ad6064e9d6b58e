//! Store - the local replica of one remote table.
//!
//! The store holds cached records and the mutation queue for one entity type.
//! Local writes are staged here and queued; the host reports remote results
//! back so the store can confirm or flag them.

use crate::{
    entity::EntityConfig, error::Result, snapshot::PersistedRecord, CachedRecord, Error, Fields,
    LocalId, MutationQueue, OperationType, PendingAction, QueueId, QueuedOperation, RemoteId,
    RemoteRow, StoreSnapshot, TableName, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// How a local write should be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Create,
    Update,
}

impl From<WriteMode> for OperationType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::Create => OperationType::Create,
            WriteMode::Update => OperationType::Update,
        }
    }
}

/// Identifies a cached record by local id, remote id, or both.
///
/// The local id is tried first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordTarget {
    #[serde(default)]
    pub local_id: Option<LocalId>,
    #[serde(default, rename = "targetId", alias = "remoteId")]
    pub remote_id: Option<RemoteId>,
}

impl RecordTarget {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn local(local_id: LocalId) -> Self {
        Self {
            local_id: Some(local_id),
            remote_id: None,
        }
    }

    pub fn remote(remote_id: impl Into<RemoteId>) -> Self {
        Self {
            local_id: None,
            remote_id: Some(remote_id.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.local_id.is_none() && self.remote_id.is_none()
    }
}

impl fmt::Display for RecordTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.local_id, &self.remote_id) {
            (Some(local), Some(remote)) => write!(f, "local id {local} / remote id {remote}"),
            (Some(local), None) => write!(f, "local id {local}"),
            (None, Some(remote)) => write!(f, "remote id {remote}"),
            (None, None) => f.write_str("no target"),
        }
    }
}

/// Result of queueing a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalWrite {
    /// The record written
    pub local_id: LocalId,
    /// The queued operation
    pub queue_id: QueueId,
}

/// What a remote snapshot merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Rows skipped because the local copy has pending writes
    pub skipped_pending: usize,
    /// Cached rows dropped because the remote no longer has them
    pub removed: usize,
}

impl MergeReport {
    /// Whether the merge modified the store.
    pub fn changed(&self) -> bool {
        self.inserted + self.updated + self.removed > 0
    }
}

/// The local replica of one remote table plus its mutation queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaStore {
    /// Remote table this replica mirrors
    table: TableName,
    /// Cached records by local id
    records: BTreeMap<LocalId, CachedRecord>,
    /// Remote id -> lowest local id holding it
    remote_index: HashMap<RemoteId, LocalId>,
    /// Operations pending sync
    queue: MutationQueue,
    /// Next local id to hand out
    next_local_id: LocalId,
}

impl ReplicaStore {
    /// Create an empty replica for a table.
    pub fn new(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            records: BTreeMap::new(),
            remote_index: HashMap::new(),
            queue: MutationQueue::new(),
            next_local_id: 1,
        }
    }

    pub(crate) fn from_parts(
        table: TableName,
        records: BTreeMap<LocalId, CachedRecord>,
        queue: MutationQueue,
        next_local_id: LocalId,
    ) -> Self {
        let highest = records.keys().next_back().copied().unwrap_or(0);
        let mut store = Self {
            table,
            records,
            remote_index: HashMap::new(),
            queue,
            next_local_id: next_local_id.max(highest + 1),
        };
        store.reindex();
        store
    }

    /// Get the table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Get a record by local id.
    pub fn get(&self, local_id: LocalId) -> Option<&CachedRecord> {
        self.records.get(&local_id)
    }

    /// Get a record by remote id.
    pub fn get_by_remote_id(&self, remote_id: &RemoteId) -> Option<&CachedRecord> {
        self.remote_index
            .get(remote_id)
            .and_then(|local_id| self.records.get(local_id))
    }

    /// Resolve a target, local id first.
    pub fn resolve(&self, target: &RecordTarget) -> Option<&CachedRecord> {
        target
            .local_id
            .and_then(|id| self.get(id))
            .or_else(|| target.remote_id.as_ref().and_then(|id| self.get_by_remote_id(id)))
    }

    /// All records in local id order, including ones pending deletion.
    pub fn records(&self) -> impl Iterator<Item = &CachedRecord> {
        self.records.values()
    }

    /// Records to show readers, in the entity's configured order.
    pub fn visible_records(&self, config: &EntityConfig) -> Vec<CachedRecord> {
        let mut visible: Vec<_> = self
            .records
            .values()
            .filter(|r| r.is_visible())
            .cloned()
            .collect();
        visible.sort_by(|a, b| config.compare_records(a, b));
        visible
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get the mutation queue.
    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub(crate) fn queue_mut(&mut self) -> &mut MutationQueue {
        &mut self.queue
    }

    /// Count of operations pending sync.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// The remote id an operation should be sent to: the one captured on the
    /// operation, else the record's current one.
    pub fn remote_target(&self, op: &QueuedOperation) -> Option<RemoteId> {
        op.target_remote_id.clone().or_else(|| {
            self.get(op.target_local_id)
                .and_then(|record| record.remote_id.clone())
        })
    }

    /// Merge a full remote collection into the replica.
    ///
    /// Rows whose local copy has pending writes are left alone. Cached rows
    /// with a remote id that is absent from `rows` and nothing pending are
    /// treated as remotely deleted. Local-only fields of `config` survive on
    /// updated rows.
    pub fn upsert_from_remote(
        &mut self,
        config: &EntityConfig,
        rows: Vec<RemoteRow>,
    ) -> MergeReport {
        let local_only = &config.local_only_fields;
        let mut report = MergeReport::default();
        let mut seen = HashSet::with_capacity(rows.len());

        for row in rows {
            seen.insert(row.remote_id.clone());

            match self.remote_index.get(&row.remote_id).copied() {
                Some(local_id) => {
                    let Some(record) = self.records.get_mut(&local_id) else {
                        continue;
                    };
                    if record.has_pending_writes {
                        report.skipped_pending += 1;
                    } else if record.is_in_sync_with(&row, local_only) {
                        report.unchanged += 1;
                    } else {
                        record.apply_remote(row, local_only);
                        report.updated += 1;
                    }
                }
                None => {
                    let local_id = self.allocate_local_id();
                    self.insert_record(CachedRecord::new_remote(local_id, row));
                    report.inserted += 1;
                }
            }
        }

        let stale: Vec<LocalId> = self
            .records
            .values()
            .filter(|r| {
                !r.has_pending_writes
                    && r.remote_id.as_ref().is_some_and(|id| !seen.contains(id))
            })
            .map(|r| r.local_id)
            .collect();

        for local_id in stale {
            self.remove_record(local_id);
            report.removed += 1;
        }

        report
    }

    /// Merge a payload onto the targeted record (or create one) and flag it
    /// pending. Returns the resolved local id and the operation to queue.
    pub fn stage_local_change(
        &mut self,
        config: &EntityConfig,
        payload: Fields,
        target: &RecordTarget,
        mode: WriteMode,
        timestamp: Timestamp,
    ) -> Result<(LocalId, QueuedOperation)> {
        let local_fields = config.to_local_fields(&payload);

        if let Some(local_id) = self.resolve(target).map(|r| r.local_id) {
            let queued_before = self.queue.has_pending_for(local_id);
            let record = self
                .records
                .get_mut(&local_id)
                .ok_or_else(|| Error::RecordNotFound(target.to_string()))?;

            if record.pending_action == PendingAction::Delete {
                return Err(Error::RecordPendingDelete(local_id));
            }

            record.merge_fields(&local_fields);

            // A record never sent anywhere still needs its create.
            let op = if record.remote_id.is_none() && !queued_before {
                record.mark_pending(PendingAction::Create, timestamp);
                QueuedOperation::create(local_id, config.to_remote_shape(&record.fields), timestamp)
            } else {
                record.mark_pending(PendingAction::Update, timestamp);
                QueuedOperation::update(
                    local_id,
                    record.remote_id.clone(),
                    config.to_remote_shape(&payload),
                    timestamp,
                )
            };
            return Ok((local_id, op));
        }

        if target.remote_id.is_none() && target.local_id.is_some() {
            return Err(Error::RecordNotFound(target.to_string()));
        }

        let local_id = self.allocate_local_id();
        let op = match (&target.remote_id, mode) {
            (Some(remote_id), _) => {
                // Known remotely but not cached yet.
                self.insert_record(CachedRecord::new_local(
                    local_id,
                    Some(remote_id.clone()),
                    local_fields,
                    PendingAction::Update,
                    timestamp,
                ));
                QueuedOperation::update(
                    local_id,
                    Some(remote_id.clone()),
                    config.to_remote_shape(&payload),
                    timestamp,
                )
            }
            (None, WriteMode::Update) => {
                return Err(Error::InvalidTarget(
                    "an update needs a local id or a target id".into(),
                ));
            }
            (None, WriteMode::Create) => {
                let remote_payload = config.to_remote_shape(&local_fields);
                self.insert_record(CachedRecord::new_local(
                    local_id,
                    None,
                    local_fields,
                    PendingAction::Create,
                    timestamp,
                ));
                QueuedOperation::create(local_id, remote_payload, timestamp)
            }
        };

        Ok((local_id, op))
    }

    /// Flag the targeted record for deletion. It stays cached (hidden from
    /// readers) until the remote delete is confirmed. Returns `None` for the
    /// operation when a delete is already queued.
    pub fn stage_delete(
        &mut self,
        target: &RecordTarget,
        timestamp: Timestamp,
    ) -> Result<(LocalId, Option<QueuedOperation>)> {
        let local_id = self
            .resolve(target)
            .map(|r| r.local_id)
            .ok_or_else(|| Error::RecordNotFound(target.to_string()))?;
        let record = self
            .records
            .get_mut(&local_id)
            .ok_or_else(|| Error::RecordNotFound(target.to_string()))?;

        if record.pending_action == PendingAction::Delete {
            return Ok((local_id, None));
        }

        record.mark_pending(PendingAction::Delete, timestamp);
        let op = QueuedOperation::delete(local_id, record.remote_id.clone(), timestamp);
        Ok((local_id, Some(op)))
    }

    /// Stage a write and queue its operation.
    pub fn queue_local_write(
        &mut self,
        config: &EntityConfig,
        payload: Fields,
        target: &RecordTarget,
        mode: WriteMode,
        timestamp: Timestamp,
    ) -> Result<LocalWrite> {
        let (local_id, op) = self.stage_local_change(config, payload, target, mode, timestamp)?;
        let queue_id = self.queue.enqueue(op);
        self.refresh_pending_flags(local_id);
        Ok(LocalWrite { local_id, queue_id })
    }

    /// Stage a delete and queue its operation.
    pub fn queue_local_delete(
        &mut self,
        target: &RecordTarget,
        timestamp: Timestamp,
    ) -> Result<LocalWrite> {
        let (local_id, op) = self.stage_delete(target, timestamp)?;
        let queue_id = match op {
            Some(op) => self.queue.enqueue(op),
            None => self
                .queue
                .peek_all()
                .into_iter()
                .find(|op| {
                    op.target_local_id == local_id
                        && op.operation_type == OperationType::Delete
                })
                .map(|op| op.queue_id)
                .unwrap_or_default(),
        };
        Ok(LocalWrite { local_id, queue_id })
    }

    /// Record a successful create or update.
    ///
    /// The operation leaves the queue and the server's remote id is filled into
    /// any later operations for the same record. If none remain, the record
    /// mirrors the server row and its pending flags clear; otherwise local
    /// fields are kept and the record stays pending. Local-only fields of
    /// `config` are never dropped.
    pub fn confirm_synced(
        &mut self,
        config: &EntityConfig,
        op: &QueuedOperation,
        row: RemoteRow,
    ) {
        if self.queue.remove(op.queue_id).is_none() {
            return;
        }
        let local_id = op.target_local_id;
        if !self.records.contains_key(&local_id) {
            return;
        }

        let remote_id = row.remote_id.clone();
        self.set_remote_id(local_id, &remote_id);
        self.queue.assign_remote_id(local_id, &remote_id);

        let still_pending = self.queue.has_pending_for(local_id);
        if let Some(record) = self.records.get_mut(&local_id) {
            if still_pending {
                for (key, value) in row.fields {
                    record.fields.entry(key).or_insert(value);
                }
                record.sync_error = None;
            } else {
                record.apply_remote(row, &config.local_only_fields);
            }
        }
        if still_pending {
            self.refresh_pending_flags(local_id);
        }

        // A snapshot taken during the round-trip may have cached the new row
        // under a fresh local id.
        let shadows: Vec<LocalId> = self
            .records
            .values()
            .filter(|r| {
                r.local_id != local_id
                    && !r.has_pending_writes
                    && r.remote_id.as_ref() == Some(&remote_id)
            })
            .map(|r| r.local_id)
            .collect();
        for shadow in shadows {
            self.remove_record(shadow);
        }
    }

    /// Record a successful (or already-gone) remote delete.
    pub fn confirm_delete(&mut self, op: &QueuedOperation) -> Option<CachedRecord> {
        self.queue.remove(op.queue_id)?;
        self.queue.remove_for_local(op.target_local_id);
        self.remove_record(op.target_local_id)
    }

    /// Attach a sync error to a record. Returns false if it no longer exists.
    pub fn record_sync_error(&mut self, local_id: LocalId, message: impl Into<String>) -> bool {
        match self.records.get_mut(&local_id) {
            Some(record) => {
                record.sync_error = Some(message.into());
                true
            }
            None => false,
        }
    }

    /// Remove a record and every operation queued for it.
    pub fn purge(&mut self, local_id: LocalId) -> (Option<CachedRecord>, usize) {
        let removed_ops = self.queue.remove_for_local(local_id);
        (self.remove_record(local_id), removed_ops)
    }

    /// Export the current state as a snapshot.
    pub fn export_state(&self, exported_at: Timestamp) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new(self.table.clone());
        snapshot.records = self.records.values().map(PersistedRecord::from).collect();
        snapshot.queue = self.queue.peek_all();
        snapshot.next_local_id = self.next_local_id;
        snapshot.next_queue_id = self.queue.next_queue_id();
        snapshot.exported_at = exported_at;
        snapshot
    }

    fn allocate_local_id(&mut self) -> LocalId {
        let id = self.next_local_id;
        self.next_local_id += 1;
        id
    }

    fn insert_record(&mut self, record: CachedRecord) {
        if let Some(remote_id) = &record.remote_id {
            self.index(remote_id.clone(), record.local_id);
        }
        self.records.insert(record.local_id, record);
    }

    pub(crate) fn remove_record(&mut self, local_id: LocalId) -> Option<CachedRecord> {
        let record = self.records.remove(&local_id)?;
        if let Some(remote_id) = &record.remote_id {
            self.unindex(remote_id, local_id);
        }
        Some(record)
    }

    fn set_remote_id(&mut self, local_id: LocalId, remote_id: &RemoteId) {
        let Some(record) = self.records.get_mut(&local_id) else {
            return;
        };
        let previous = record.remote_id.replace(remote_id.clone());
        if let Some(previous) = previous.filter(|p| p != remote_id) {
            self.unindex(&previous, local_id);
        }
        self.index(remote_id.clone(), local_id);
    }

    fn index(&mut self, remote_id: RemoteId, local_id: LocalId) {
        let entry = self.remote_index.entry(remote_id).or_insert(local_id);
        if *entry > local_id {
            *entry = local_id;
        }
    }

    fn unindex(&mut self, remote_id: &RemoteId, local_id: LocalId) {
        if self.remote_index.get(remote_id) != Some(&local_id) {
            return;
        }
        self.remote_index.remove(remote_id);
        let replacement = self
            .records
            .values()
            .find(|r| r.local_id != local_id && r.remote_id.as_ref() == Some(remote_id))
            .map(|r| r.local_id);
        if let Some(replacement) = replacement {
            self.remote_index.insert(remote_id.clone(), replacement);
        }
    }

    fn reindex(&mut self) {
        self.remote_index.clear();
        for record in self.records.values() {
            if let Some(remote_id) = &record.remote_id {
                self.remote_index
                    .entry(remote_id.clone())
                    .or_insert(record.local_id);
            }
        }
    }

    /// Align a record's pending flags with its queued operations: a queued
    /// delete wins, otherwise the earliest operation decides the action.
    pub(crate) fn refresh_pending_flags(&mut self, local_id: LocalId) {
        let next = self.queue.next_for(local_id).map(|op| op.operation_type);
        let deleting = self.queue.peek_all().iter().any(|op| {
            op.target_local_id == local_id && op.operation_type == OperationType::Delete
        });
        let Some(record) = self.records.get_mut(&local_id) else {
            return;
        };
        match next {
            Some(_) if deleting => {
                record.has_pending_writes = true;
                record.pending_action = PendingAction::Delete;
            }
            Some(op_type) => {
                record.has_pending_writes = true;
                record.pending_action = op_type.into();
            }
            None => record.clear_pending(),
        }
    }
}
