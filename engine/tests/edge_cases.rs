//! Edge case tests for harbor-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use harbor_engine::{
    reconcile, EntityConfig, Error, Fields, OperationType, OrderBy, PendingAction, RecordTarget,
    RemoteId, RemoteRow, ReplicaStore, StoreSnapshot, WriteMode,
};
use serde_json::json;

fn fields(value: serde_json::Value) -> Fields {
    value.as_object().cloned().unwrap()
}

fn config() -> EntityConfig {
    EntityConfig::new("items")
}

fn create(store: &mut ReplicaStore, value: serde_json::Value, ts: u64) -> u64 {
    store
        .queue_local_write(
            &config(),
            fields(value),
            &RecordTarget::none(),
            WriteMode::Create,
            ts,
        )
        .unwrap()
        .local_id
}

// ============================================================================
// Payload Edge Cases
// ============================================================================

#[test]
fn empty_payload_create() {
    let mut store = ReplicaStore::new("items");
    let local_id = create(&mut store, json!({}), 1000);

    let record = store.get(local_id).unwrap();
    assert!(record.fields.is_empty());
    assert_eq!(store.queue().peek_all()[0].payload, Fields::new());
}

#[test]
fn unicode_strings() {
    let mut store = ReplicaStore::new("items");

    let names = vec![
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
    ];

    for (i, name) in names.iter().enumerate() {
        let local_id = create(&mut store, json!({"name": name}), i as u64);
        assert_eq!(store.get(local_id).unwrap().fields["name"], json!(name));
    }

    let snapshot = store.export_state(0);
    let restored = StoreSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
    assert_eq!(snapshot, restored);
}

#[test]
fn deeply_nested_json() {
    let mut store = ReplicaStore::new("items");
    let nested = json!({"address": {"street": {"line": ["12", {"unit": "B"}]}}});
    let local_id = create(&mut store, nested.clone(), 1000);

    assert_eq!(store.get(local_id).unwrap().fields, fields(nested));
}

#[test]
fn update_replaces_nested_values_whole() {
    let mut store = ReplicaStore::new("items");
    store.upsert_from_remote(&config(), vec![RemoteRow::new(
        "1",
        fields(json!({"address": {"city": "Iloilo", "zip": "5000"}})),
    )]);

    store
        .queue_local_write(
            &config(),
            fields(json!({"address": {"city": "Cebu"}})),
            &RecordTarget::remote("1"),
            WriteMode::Update,
            1000,
        )
        .unwrap();

    let record = store.get_by_remote_id(&RemoteId::from("1")).unwrap();
    assert_eq!(record.fields["address"], json!({"city": "Cebu"}));
}

#[test]
fn client_sent_id_column_is_ignored() {
    let mut store = ReplicaStore::new("items");
    let local_id = create(&mut store, json!({"id": 99, "name": "A"}), 1000);

    assert_eq!(store.get(local_id).unwrap().remote_id, None);
    assert!(!store.queue().peek_all()[0].payload.contains_key("id"));
}

// ============================================================================
// Remote Id Edge Cases
// ============================================================================

#[test]
fn numeric_and_string_remote_ids_match() {
    let config = config();
    let row = config.to_local_shape(&json!({"id": 12, "name": "A"})).unwrap();

    let mut store = ReplicaStore::new("items");
    store.upsert_from_remote(&config, vec![row]);

    assert!(store.get_by_remote_id(&RemoteId::from("12")).is_some());
    assert!(store.get_by_remote_id(&RemoteId::from(12i64)).is_some());
}

#[test]
fn uuid_remote_ids() {
    let config = config();
    let row = config
        .to_local_shape(&json!({"id": "3f2b8c4e-2d1a-4b6f-9a0e-7c1d2e3f4a5b", "name": "A"}))
        .unwrap();
    assert_eq!(row.remote_id.as_str(), "3f2b8c4e-2d1a-4b6f-9a0e-7c1d2e3f4a5b");
}

#[test]
fn update_for_uncached_remote_id_creates_pending_row() {
    let mut store = ReplicaStore::new("items");
    let write = store
        .queue_local_write(
            &config(),
            fields(json!({"name": "late"})),
            &RecordTarget::remote("77"),
            WriteMode::Update,
            1000,
        )
        .unwrap();

    let record = store.get(write.local_id).unwrap();
    assert_eq!(record.remote_id, Some(RemoteId::from("77")));
    assert_eq!(record.pending_action, PendingAction::Update);

    // A snapshot that does not include the row yet must not drop it.
    store.upsert_from_remote(&config(), vec![]);
    assert!(store.get(write.local_id).is_some());
}

// ============================================================================
// Operation Ordering Edge Cases
// ============================================================================

#[test]
fn same_timestamp_keeps_enqueue_order() {
    let mut store = ReplicaStore::new("items");
    let a = create(&mut store, json!({"name": "a"}), 1000);
    let b = create(&mut store, json!({"name": "b"}), 1000);
    let c = create(&mut store, json!({"name": "c"}), 1000);

    let order: Vec<_> = store
        .queue()
        .peek_all()
        .iter()
        .map(|op| op.target_local_id)
        .collect();
    assert_eq!(order, vec![a, b, c]);
}

#[test]
fn rapid_updates_same_record() {
    let mut store = ReplicaStore::new("items");
    store.upsert_from_remote(
        &config(),
        vec![RemoteRow::new("1", fields(json!({"count": 0})))],
    );

    for i in 1..=50 {
        store
            .queue_local_write(
                &config(),
                fields(json!({"count": i})),
                &RecordTarget::remote("1"),
                WriteMode::Update,
                1000 + i,
            )
            .unwrap();
    }

    assert_eq!(store.pending_count(), 50);
    let record = store.get_by_remote_id(&RemoteId::from("1")).unwrap();
    assert_eq!(record.fields["count"], json!(50));

    // Confirm in order; the record stays pending until the last one.
    let ops = store.queue().peek_all();
    for (i, op) in ops.iter().enumerate() {
        let count = op.payload["count"].clone();
        store.confirm_synced(
            &config(),
            op,
            RemoteRow::new("1", fields(json!({"count": count}))),
        );
        let record = store.get_by_remote_id(&RemoteId::from("1")).unwrap();
        assert_eq!(record.has_pending_writes, i + 1 < ops.len());
    }
    assert_eq!(
        store.get_by_remote_id(&RemoteId::from("1")).unwrap().fields["count"],
        json!(50)
    );
}

#[test]
fn create_then_delete_before_sync() {
    let mut store = ReplicaStore::new("items");
    let local_id = create(&mut store, json!({"name": "draft"}), 1000);
    store
        .queue_local_delete(&RecordTarget::local(local_id), 1001)
        .unwrap();

    let types: Vec<_> = store
        .queue()
        .peek_all()
        .iter()
        .map(|op| op.operation_type)
        .collect();
    assert_eq!(types, vec![OperationType::Create, OperationType::Delete]);
    assert!(store.visible_records(&config()).is_empty());

    // Create confirms with a remote id; the delete picks it up.
    let ops = store.queue().peek_all();
    store.confirm_synced(
        &config(),
        &ops[0],
        RemoteRow::new("5", fields(json!({"name": "draft"}))),
    );
    let delete = store.queue().peek_all().remove(0);
    assert_eq!(delete.target_remote_id, Some(RemoteId::from("5")));
    assert_eq!(
        store.get(local_id).unwrap().pending_action,
        PendingAction::Delete
    );

    store.confirm_delete(&delete);
    assert!(store.is_empty());
}

#[test]
fn delete_unknown_record() {
    let mut store = ReplicaStore::new("items");
    assert!(matches!(
        store.queue_local_delete(&RecordTarget::remote("404"), 1000),
        Err(Error::RecordNotFound(_))
    ));
}

// ============================================================================
// Snapshot Edge Cases
// ============================================================================

#[test]
fn snapshot_empty_store() {
    let store = ReplicaStore::new("items");
    let snapshot = store.export_state(0);
    assert_eq!(snapshot.record_count(), 0);

    let (restored, report) = reconcile::restore(snapshot, "items").unwrap();
    assert!(restored.is_empty());
    assert!(report.is_clean());
}

#[test]
fn snapshot_with_pending_delete() {
    let mut store = ReplicaStore::new("items");
    store.upsert_from_remote(
        &config(),
        vec![RemoteRow::new("1", fields(json!({"name": "A"})))],
    );
    store
        .queue_local_delete(&RecordTarget::remote("1"), 1000)
        .unwrap();

    let json = store.export_state(2000).to_json().unwrap();
    let (restored, _) =
        reconcile::restore(StoreSnapshot::from_json(&json).unwrap(), "items").unwrap();

    assert_eq!(restored.len(), 1);
    assert_eq!(restored.pending_count(), 1);
    assert!(restored.visible_records(&config()).is_empty());
}

#[test]
fn legacy_snapshot_file() {
    let json = r#"{
        "table": "items",
        "records": [
            {"key": 1, "remoteId": "10", "fields": {"name": "first"}},
            {"key": 2, "remoteId": "10", "fields": {"name": "copy"}},
            {"key": 3, "fields": {"name": "draft"}, "hasPendingWrites": true, "pendingAction": "create"}
        ],
        "queue": [
            {"queueId": 1, "operationType": "create", "targetLocalId": 3,
             "targetRemoteId": null, "payload": {"name": "draft"}, "createdAt": 500}
        ]
    }"#;

    let snapshot = StoreSnapshot::from_json(json).unwrap();
    let (store, report) = reconcile::restore(snapshot, "items").unwrap();

    assert_eq!(report.backfilled, 3);
    assert_eq!(report.duplicates_removed, vec![2]);
    assert_eq!(store.len(), 2);
    assert_eq!(store.get(1).unwrap().fields["name"], json!("first"));
    assert_eq!(store.get(3).unwrap().pending_action, PendingAction::Create);
}

// ============================================================================
// Live View Ordering
// ============================================================================

#[test]
fn visible_records_order_with_local_rows() {
    let config = config().with_order(OrderBy::asc("name"));
    let mut store = ReplicaStore::new("items");
    store.upsert_from_remote(
        &config,
        vec![
            RemoteRow::new("1", fields(json!({"name": "carla"}))),
            RemoteRow::new("2", fields(json!({"name": "ana"}))),
        ],
    );
    create(&mut store, json!({"name": "bea"}), 1000);
    create(&mut store, json!({}), 1001);

    let names: Vec<_> = store
        .visible_records(&config)
        .iter()
        .map(|r| r.fields.get("name").cloned())
        .collect();
    assert_eq!(
        names,
        vec![
            Some(json!("ana")),
            Some(json!("bea")),
            Some(json!("carla")),
            None
        ]
    );
}

// ============================================================================
// Volume
// ============================================================================

#[test]
fn many_pending_operations() {
    let mut store = ReplicaStore::new("items");
    for i in 0..1000u64 {
        create(&mut store, json!({"name": format!("item {}", i)}), i);
    }

    assert_eq!(store.pending_count(), 1000);
    assert_eq!(store.len(), 1000);

    // Snapshot with nothing for the pending rows leaves them alone.
    let report = store.upsert_from_remote(&config(), vec![]);
    assert_eq!(report.removed, 0);
    assert_eq!(store.len(), 1000);
}
