//! # Harbor Engine
//!
//! The deterministic core of an offline-first replica cache.
//!
//! This crate keeps a local replica of one remote table, stages local writes
//! against it and records them in an ordered mutation queue until a sync pass
//! confirms them. It has no knowledge of clocks, files or the network: time is
//! passed in as millisecond timestamps and every remote interaction happens in
//! the host (see the `harbor-server` crate).
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches storage or the network
//! - **Local writes always succeed**: staging a change only depends on local state
//! - **Pending writes win**: a remote snapshot never overwrites a row that has
//!   unsynced local changes
//! - **FIFO replay**: queued operations are confirmed strictly in enqueue order
//!
//! ## Core Concepts
//!
//! ### Cached records
//!
//! A [`CachedRecord`] mirrors one remote row and carries local-only metadata:
//! a stable local id, the remote id once known, a pending-write flag, the
//! pending action, the last sync error and the time of the last local change.
//!
//! ### Mutation queue
//!
//! Every local write appends a [`QueuedOperation`] to the [`MutationQueue`].
//! The host drains the queue in order, one remote round-trip at a time, and
//! reports the result back with [`ReplicaStore::confirm_synced`],
//! [`ReplicaStore::confirm_delete`] or [`ReplicaStore::record_sync_error`].
//!
//! ### Snapshots
//!
//! [`ReplicaStore::upsert_from_remote`] merges a full remote collection into
//! the replica. [`StoreSnapshot`] is the persisted form of a replica and its
//! queue; [`reconcile::restore`] loads one, backfilling missing local ids and
//! dropping duplicate rows.
//!
//! ## Quick Start
//!
//! ```rust
//! use harbor_engine::{EntityConfig, RecordTarget, RemoteRow, ReplicaStore, WriteMode};
//! use serde_json::json;
//!
//! let config = EntityConfig::new("cases");
//! let mut store = ReplicaStore::new("cases");
//!
//! // Stage a create while offline.
//! let payload = json!({"name": "X"}).as_object().cloned().unwrap();
//! let write = store
//!     .queue_local_write(&config, payload, &RecordTarget::none(), WriteMode::Create, 1_000)
//!     .unwrap();
//! assert_eq!(store.queue().len(), 1);
//!
//! // The host inserts the payload remotely and confirms the result.
//! let op = store.queue().peek_all().remove(0);
//! let row = RemoteRow::new("17", json!({"name": "X"}).as_object().cloned().unwrap());
//! store.confirm_synced(&config, &op, row);
//!
//! let record = store.get(write.local_id).unwrap();
//! assert_eq!(record.remote_id.as_ref().map(|id| id.as_str()), Some("17"));
//! assert!(store.queue().is_empty());
//! ```

pub mod entity;
pub mod error;
pub mod operation;
pub mod queue;
pub mod reconcile;
pub mod record;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use entity::{compare_json, EntityConfig, FieldMapper, OrderBy, RemoteTable, Scope};
pub use error::Error;
pub use operation::{OperationType, QueuedOperation};
pub use queue::MutationQueue;
pub use reconcile::LocalIdReport;
pub use record::{CachedRecord, PendingAction, RemoteId, RemoteRow};
pub use snapshot::{PersistedRecord, SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{LocalWrite, MergeReport, RecordTarget, ReplicaStore, WriteMode};

/// Type aliases for clarity
pub type LocalId = u64;
pub type QueueId = u64;
pub type Timestamp = u64;
pub type TableName = String;

/// A JSON object holding entity fields.
pub type Fields = serde_json::Map<String, serde_json::Value>;
