//! Snapshot types for persisting and restoring replica state.
//!
//! A snapshot is the persisted form of one [`ReplicaStore`](crate::ReplicaStore):
//! its records, its queue and its id counters. Records are written with their
//! storage key; older snapshots may carry records without a `localId`, which
//! [`reconcile::restore`](crate::reconcile::restore) backfills from the key.

use crate::{
    error::Result, CachedRecord, Error, Fields, LocalId, PendingAction, QueueId, QueuedOperation,
    RemoteId, TableName, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

fn default_format_version() -> u32 {
    SNAPSHOT_FORMAT_VERSION
}

/// One record as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    /// Storage key
    pub key: LocalId,
    /// Missing in rows written before local ids were stored explicitly
    #[serde(default)]
    pub local_id: Option<LocalId>,
    #[serde(default)]
    pub remote_id: Option<RemoteId>,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default)]
    pub has_pending_writes: bool,
    #[serde(default)]
    pub pending_action: PendingAction,
    #[serde(default)]
    pub sync_error: Option<String>,
    #[serde(default)]
    pub last_local_change: Option<Timestamp>,
}

impl PersistedRecord {
    /// Convert to a cached record with the given local id.
    pub fn into_cached(self, local_id: LocalId) -> CachedRecord {
        CachedRecord {
            local_id,
            remote_id: self.remote_id,
            fields: self.fields,
            has_pending_writes: self.has_pending_writes,
            pending_action: self.pending_action,
            sync_error: self.sync_error,
            last_local_change: self.last_local_change,
        }
    }
}

impl From<&CachedRecord> for PersistedRecord {
    fn from(record: &CachedRecord) -> Self {
        Self {
            key: record.local_id,
            local_id: Some(record.local_id),
            remote_id: record.remote_id.clone(),
            fields: record.fields.clone(),
            has_pending_writes: record.has_pending_writes,
            pending_action: record.pending_action,
            sync_error: record.sync_error.clone(),
            last_local_change: record.last_local_change,
        }
    }
}

/// A point-in-time snapshot of one replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Remote table the replica mirrors
    pub table: TableName,
    /// Records in key order
    #[serde(default)]
    pub records: Vec<PersistedRecord>,
    /// Pending operations in FIFO order
    #[serde(default)]
    pub queue: Vec<QueuedOperation>,
    #[serde(default)]
    pub next_local_id: LocalId,
    #[serde(default)]
    pub next_queue_id: QueueId,
    /// When the snapshot was taken (milliseconds since epoch)
    #[serde(default)]
    pub exported_at: Timestamp,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(table: impl Into<TableName>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            table: table.into(),
            records: Vec::new(),
            queue: Vec::new(),
            next_local_id: 1,
            next_queue_id: 1,
            exported_at: 0,
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Check the snapshot belongs to `table`.
    pub fn validate(&self, table: &str) -> Result<()> {
        if self.table != table {
            return Err(Error::TableMismatch {
                expected: table.to_string(),
                actual: self.table.clone(),
            });
        }
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub table: TableName,
    pub record_count: usize,
    pub pending_count: usize,
    pub exported_at: Timestamp,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            table: snapshot.table.clone(),
            record_count: snapshot.record_count(),
            pending_count: snapshot.pending_count(),
            exported_at: snapshot.exported_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityConfig, RecordTarget, ReplicaStore, WriteMode};
    use serde_json::json;

    #[test]
    fn create_empty_snapshot() {
        let snapshot = StoreSnapshot::new("cases");
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.table, "cases");
        assert_eq!(snapshot.record_count(), 0);
        assert!(snapshot.validate("cases").is_ok());
    }

    #[test]
    fn validate_rejects_other_table() {
        let snapshot = StoreSnapshot::new("cases");
        assert!(matches!(
            snapshot.validate("partners"),
            Err(Error::TableMismatch { .. })
        ));
    }

    #[test]
    fn json_round_trip() {
        let mut store = ReplicaStore::new("cases");
        store
            .queue_local_write(
                &EntityConfig::new("cases"),
                json!({"name": "A"}).as_object().cloned().unwrap(),
                &RecordTarget::none(),
                WriteMode::Create,
                1000,
            )
            .unwrap();

        let snapshot = store.export_state(2000);
        let json = snapshot.to_json().unwrap();
        let restored = StoreSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot, restored);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["records"][0]["localId"], json!(1));
        assert_eq!(value["records"][0]["pendingAction"], json!("create"));
    }

    #[test]
    fn reads_records_without_local_id() {
        let json = r#"{
            "table": "cases",
            "records": [
                {"key": 3, "remoteId": "10", "fields": {"name": "legacy"}}
            ]
        }"#;

        let snapshot = StoreSnapshot::from_json(json).unwrap();
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.records[0].local_id, None);
        assert_eq!(snapshot.records[0].key, 3);
        assert_eq!(snapshot.records[0].pending_action, PendingAction::None);
        assert!(snapshot.queue.is_empty());
    }

    #[test]
    fn rejects_newer_format() {
        let json = r#"{"formatVersion": 99, "table": "cases"}"#;
        assert!(matches!(
            StoreSnapshot::from_json(json),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            StoreSnapshot::from_json("not json"),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn metadata() {
        let mut snapshot = StoreSnapshot::new("cases");
        snapshot.exported_at = 42;
        let metadata = SnapshotMetadata::from(&snapshot);
        assert_eq!(metadata.table, "cases");
        assert_eq!(metadata.record_count, 0);
        assert_eq!(metadata.exported_at, 42);
    }
}
