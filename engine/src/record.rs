//! Cached record types.

use crate::{Fields, LocalId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier assigned by the remote store.
///
/// Numeric identifiers are kept as their decimal text so that integer and
/// uuid keyed tables share one representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl<'de> Deserialize<'de> for RemoteId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        RemoteId::from_value(&value).ok_or_else(|| {
            serde::de::Error::custom("remote id must be a non-empty string or a number")
        })
    }
}

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read a remote id out of a JSON value. Empty strings, nulls and
    /// structured values are not ids.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RemoteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for RemoteId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// The in-flight intent of a cached record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingAction {
    Create,
    Update,
    Delete,
    #[default]
    None,
}

/// A remote row mapped into its local shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRow {
    pub remote_id: RemoteId,
    pub fields: Fields,
}

impl RemoteRow {
    pub fn new(remote_id: impl Into<RemoteId>, fields: Fields) -> Self {
        Self {
            remote_id: remote_id.into(),
            fields,
        }
    }
}

/// One entity instance mirrored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRecord {
    /// Stable local identifier, never reused
    pub local_id: LocalId,
    /// Identifier assigned by the remote store on first successful create
    pub remote_id: Option<RemoteId>,
    /// Entity payload
    pub fields: Fields,
    /// True from the moment a local mutation is queued until it is synced
    pub has_pending_writes: bool,
    /// The in-flight intent
    pub pending_action: PendingAction,
    /// Last error from a failed sync attempt
    pub sync_error: Option<String>,
    /// Time of the most recent local mutation (milliseconds since epoch)
    pub last_local_change: Option<Timestamp>,
}

impl CachedRecord {
    /// Create a record for a local write that has not reached the remote yet.
    pub fn new_local(
        local_id: LocalId,
        remote_id: Option<RemoteId>,
        fields: Fields,
        action: PendingAction,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            local_id,
            remote_id,
            fields,
            has_pending_writes: true,
            pending_action: action,
            sync_error: None,
            last_local_change: Some(timestamp),
        }
    }

    /// Create a confirmed record from a remote row.
    pub fn new_remote(local_id: LocalId, row: RemoteRow) -> Self {
        Self {
            local_id,
            remote_id: Some(row.remote_id),
            fields: row.fields,
            has_pending_writes: false,
            pending_action: PendingAction::None,
            sync_error: None,
            last_local_change: None,
        }
    }

    /// Whether the record should be shown to readers.
    pub fn is_visible(&self) -> bool {
        self.pending_action != PendingAction::Delete
    }

    /// Whether applying `row` would leave the record unchanged.
    ///
    /// Keys in `local_only` that the record already holds are not compared.
    pub fn is_in_sync_with(&self, row: &RemoteRow, local_only: &BTreeSet<String>) -> bool {
        let kept = |key: &String| local_only.contains(key) && self.fields.contains_key(key);

        !self.has_pending_writes
            && self.sync_error.is_none()
            && self.remote_id.as_ref() == Some(&row.remote_id)
            && row
                .fields
                .iter()
                .all(|(key, value)| kept(key) || self.fields.get(key) == Some(value))
            && self
                .fields
                .keys()
                .all(|key| row.fields.contains_key(key) || local_only.contains(key))
    }

    /// Merge payload keys onto the current fields.
    pub fn merge_fields(&mut self, payload: &Fields) {
        for (key, value) in payload {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Flag a local mutation.
    pub fn mark_pending(&mut self, action: PendingAction, timestamp: Timestamp) {
        self.has_pending_writes = true;
        self.pending_action = action;
        self.last_local_change = Some(timestamp);
    }

    /// Replace the record with the remote state and clear local flags.
    ///
    /// Values the record holds for `local_only` keys survive.
    pub fn apply_remote(&mut self, row: RemoteRow, local_only: &BTreeSet<String>) {
        let mut fields = row.fields;
        for key in local_only {
            if let Some(value) = self.fields.remove(key) {
                fields.insert(key.clone(), value);
            }
        }
        self.remote_id = Some(row.remote_id);
        self.fields = fields;
        self.clear_pending();
    }

    /// Clear pending flags and the last sync error.
    pub fn clear_pending(&mut self) {
        self.has_pending_writes = false;
        self.pending_action = PendingAction::None;
        self.sync_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn remote_id_from_value() {
        assert_eq!(RemoteId::from_value(&json!(12)), Some(RemoteId::from("12")));
        assert_eq!(
            RemoteId::from_value(&json!("a1b2")),
            Some(RemoteId::from("a1b2"))
        );
        assert_eq!(RemoteId::from_value(&json!("")), None);
        assert_eq!(RemoteId::from_value(&json!(null)), None);
        assert_eq!(RemoteId::from_value(&json!({"id": 1})), None);
    }

    #[test]
    fn remote_id_deserializes_from_number_or_string() {
        let id: RemoteId = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(id.as_str(), "42");
        let id: RemoteId = serde_json::from_value(json!("abc")).unwrap();
        assert_eq!(id.as_str(), "abc");
        assert!(serde_json::from_value::<RemoteId>(json!("")).is_err());
    }

    #[test]
    fn local_record_is_pending() {
        let record = CachedRecord::new_local(
            1,
            None,
            fields(json!({"name": "Ana"})),
            PendingAction::Create,
            1000,
        );

        assert!(record.has_pending_writes);
        assert_eq!(record.pending_action, PendingAction::Create);
        assert_eq!(record.last_local_change, Some(1000));
        assert!(record.is_visible());
    }

    #[test]
    fn merge_keeps_untouched_fields() {
        let mut record = CachedRecord::new_local(
            1,
            None,
            fields(json!({"name": "Ana", "age": 70})),
            PendingAction::Create,
            1000,
        );
        record.merge_fields(&fields(json!({"age": 71, "barangay": "San Roque"})));

        assert_eq!(
            record.fields,
            fields(json!({"name": "Ana", "age": 71, "barangay": "San Roque"}))
        );
    }

    #[test]
    fn apply_remote_clears_flags() {
        let mut record = CachedRecord::new_local(
            3,
            None,
            fields(json!({"name": "Ana"})),
            PendingAction::Create,
            1000,
        );
        record.sync_error = Some("timeout".into());

        record.apply_remote(
            RemoteRow::new("9", fields(json!({"name": "Ana", "id_no": 1}))),
            &BTreeSet::new(),
        );

        assert_eq!(record.remote_id, Some(RemoteId::from("9")));
        assert!(!record.has_pending_writes);
        assert_eq!(record.pending_action, PendingAction::None);
        assert_eq!(record.sync_error, None);
        assert_eq!(record.local_id, 3);
    }

    #[test]
    fn apply_remote_keeps_local_only_values() {
        let local_only: BTreeSet<String> = ["draftNote".to_string()].into();
        let mut record = CachedRecord::new_local(
            1,
            None,
            fields(json!({"name": "A", "draftNote": "keep me"})),
            PendingAction::Create,
            1000,
        );

        let row = RemoteRow::new("4", fields(json!({"name": "A", "updated_at": "t1"})));
        assert!(!record.is_in_sync_with(&row, &local_only));
        record.apply_remote(row, &local_only);
        assert_eq!(
            record.fields,
            fields(json!({"name": "A", "updated_at": "t1", "draftNote": "keep me"}))
        );

        let same = RemoteRow::new("4", fields(json!({"name": "A", "updated_at": "t1"})));
        assert!(record.is_in_sync_with(&same, &local_only));
        assert!(!record.is_in_sync_with(&same, &BTreeSet::new()));

        let changed = RemoteRow::new("4", fields(json!({"name": "B", "updated_at": "t2"})));
        assert!(!record.is_in_sync_with(&changed, &local_only));
    }

    #[test]
    fn delete_pending_is_hidden() {
        let mut record =
            CachedRecord::new_remote(1, RemoteRow::new("1", fields(json!({"name": "A"}))));
        record.mark_pending(PendingAction::Delete, 2000);
        assert!(!record.is_visible());
    }

    #[test]
    fn serialization_format() {
        let record =
            CachedRecord::new_remote(1, RemoteRow::new("5", fields(json!({"name": "A"}))));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["localId"], json!(1));
        assert_eq!(json["remoteId"], json!("5"));
        assert_eq!(json["pendingAction"], json!("none"));
        assert_eq!(json["hasPendingWrites"], json!(false));
    }
}
