//! Per-entity service.
//!
//! One [`EntityService`] owns the replica, queue, live view and sync state of
//! a single entity type. Every mutation is applied to a draft copy of the
//! replica, persisted, and only then swapped in and published, so a failed
//! write leaves neither memory nor disk half-updated.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use harbor_engine::{
    reconcile, EntityConfig, LocalId, QueuedOperation, RecordTarget, RemoteId, ReplicaStore,
    SnapshotMetadata, Timestamp, WriteMode,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex, OnceCell};

use crate::connectivity::Connectivity;
use crate::error::{AppError, Result};
use crate::live::{LiveView, Rows};
use crate::persistence::Persistence;
use crate::remote::{RemoteError, RemoteStore};
use crate::sync::{self, SyncOutcome, SyncState, SyncStatus};

const STATUS_CAPACITY: usize = 64;

/// Wall-clock milliseconds since the epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Request body for a local create or update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalWriteRequest {
    /// Entity fields to merge; must be a JSON object
    pub payload: serde_json::Value,
    #[serde(flatten)]
    pub target: RecordTarget,
    /// Inferred from the target when absent
    #[serde(default)]
    pub mode: Option<WriteMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalWriteResponse {
    pub local_id: LocalId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkDeleteResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNowResponse {
    pub success: bool,
    /// True when the delete was queued instead of sent
    pub queued: bool,
}

/// Result of loading a remote snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub success: bool,
    /// Remote rows fetched
    pub count: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub offline: bool,
}

type SyncRun = Shared<BoxFuture<'static, SyncOutcome>>;

fn require_target(target: &RecordTarget) -> Result<()> {
    if target.is_empty() {
        return Err(AppError::BadRequest(
            "a localId or targetId is required".into(),
        ));
    }
    Ok(())
}

/// Offline-first access to one entity type.
pub struct EntityService {
    config: EntityConfig,
    remote: Arc<dyn RemoteStore>,
    connectivity: Connectivity,
    persistence: Persistence,
    state: Mutex<ReplicaStore>,
    ready: OnceCell<()>,
    live: watch::Sender<Rows>,
    status: broadcast::Sender<SyncStatus>,
    run_state: watch::Sender<SyncState>,
    in_flight: Mutex<Option<SyncRun>>,
}

impl std::fmt::Debug for EntityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityService")
            .field("entity", &self.config.name)
            .field("table", &self.config.table)
            .finish_non_exhaustive()
    }
}

impl EntityService {
    pub fn new(
        config: EntityConfig,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        persistence: Persistence,
    ) -> Self {
        let (live, _) = watch::channel(Rows::default());
        let (status, _) = broadcast::channel(STATUS_CAPACITY);
        let (run_state, _) = watch::channel(SyncState::Idle);
        Self {
            state: Mutex::new(ReplicaStore::new(config.table.clone())),
            config,
            remote,
            connectivity,
            persistence,
            ready: OnceCell::new(),
            live,
            status,
            run_state,
            in_flight: Mutex::new(None),
        }
    }

    pub fn new_shared(
        config: EntityConfig,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        persistence: Persistence,
    ) -> Arc<Self> {
        Arc::new(Self::new(config, remote, connectivity, persistence))
    }

    pub fn config(&self) -> &EntityConfig {
        &self.config
    }

    pub(crate) fn remote(&self) -> &dyn RemoteStore {
        self.remote.as_ref()
    }

    pub(crate) fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Load persisted state and repair local ids. Runs once per service; a
    /// failed attempt is retried by the next caller.
    pub async fn ensure_local_ids(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                let loaded = self.persistence.load(&self.config.name).await?;
                let store = match loaded {
                    Some(snapshot) => {
                        let metadata = SnapshotMetadata::from(&snapshot);
                        tracing::debug!(
                            entity = %self.config.name,
                            format_version = metadata.format_version,
                            records = metadata.record_count,
                            pending = metadata.pending_count,
                            exported_at = metadata.exported_at,
                            "Snapshot found"
                        );
                        let (store, report) = reconcile::restore(snapshot, &self.config.table)?;
                        if !report.is_clean() {
                            tracing::info!(
                                entity = %self.config.name,
                                backfilled = report.backfilled,
                                duplicates = report.duplicates_removed.len(),
                                retargeted = report.retargeted_ops,
                                stale_pending = report.stale_pending,
                                "Repaired local ids"
                            );
                            self.persistence
                                .save(&self.config.name, &store.export_state(now_millis()))
                                .await?;
                        }
                        store
                    }
                    None => ReplicaStore::new(self.config.table.clone()),
                };

                let mut state = self.state.lock().await;
                *state = store;
                self.publish(&state);
                tracing::debug!(
                    entity = %self.config.name,
                    records = state.len(),
                    pending = state.pending_count(),
                    "Replica loaded"
                );
                Ok::<(), AppError>(())
            })
            .await?;
        Ok(())
    }

    /// Apply `f` to a draft of the replica, persist it, then make it live.
    pub(crate) async fn commit<T>(
        &self,
        f: impl FnOnce(&mut ReplicaStore) -> harbor_engine::error::Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().await;
        let mut draft = state.clone();
        let value = f(&mut draft)?;
        self.persistence
            .save(&self.config.name, &draft.export_state(now_millis()))
            .await?;
        *state = draft;
        self.publish(&state);
        Ok(value)
    }

    fn publish(&self, store: &ReplicaStore) {
        let rows = store.visible_records(&self.config);
        self.live.send_if_modified(|current| {
            if current.as_slice() == rows.as_slice() {
                false
            } else {
                *current = Arc::new(rows);
                true
            }
        });
    }

    pub(crate) fn emit(&self, status: SyncStatus) {
        // No subscribers is fine.
        let _ = self.status.send(status);
    }

    pub(crate) fn set_state(&self, state: SyncState) {
        self.run_state.send_replace(state);
    }

    pub(crate) async fn queued_operations(&self) -> Vec<QueuedOperation> {
        self.state.lock().await.queue().peek_all()
    }

    /// Re-read an operation and resolve where it should be sent.
    pub(crate) async fn current_operation(
        &self,
        queue_id: u64,
    ) -> Option<(QueuedOperation, Option<RemoteId>)> {
        let state = self.state.lock().await;
        let op = state.queue().get(queue_id)?.clone();
        let target = state.remote_target(&op);
        Some((op, target))
    }

    pub(crate) async fn pending_now(&self) -> usize {
        self.state.lock().await.pending_count()
    }

    pub(crate) async fn flag_sync_error(&self, local_id: LocalId, message: &str) {
        let result = self
            .commit(|store| {
                store.record_sync_error(local_id, message);
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::error!(
                entity = %self.config.name,
                local_id,
                "Failed to record sync error: {}",
                e
            );
        }
    }

    /// Subscribe to the visible rows.
    pub async fn live_query(&self) -> Result<LiveView> {
        self.ensure_local_ids().await?;
        Ok(LiveView::new(self.live.subscribe()))
    }

    /// The visible rows right now.
    pub async fn rows(&self) -> Result<Rows> {
        self.ensure_local_ids().await?;
        Ok(self.live.borrow().clone())
    }

    pub async fn pending_operation_count(&self) -> Result<usize> {
        self.ensure_local_ids().await?;
        Ok(self.pending_now().await)
    }

    /// Stage a create or update locally and queue it for sync.
    pub async fn create_or_update_local(
        &self,
        request: LocalWriteRequest,
    ) -> Result<LocalWriteResponse> {
        self.ensure_local_ids().await?;

        let serde_json::Value::Object(payload) = request.payload else {
            return Err(harbor_engine::Error::InvalidPayload(
                "payload must be a JSON object".into(),
            )
            .into());
        };
        let target = request.target;
        let mode = request.mode.unwrap_or(if target.is_empty() {
            WriteMode::Create
        } else {
            WriteMode::Update
        });

        let now = now_millis();
        let write = self
            .commit(|store| store.queue_local_write(&self.config, payload, &target, mode, now))
            .await?;

        tracing::debug!(
            entity = %self.config.name,
            local_id = write.local_id,
            queue_id = write.queue_id,
            ?mode,
            "Local write queued"
        );
        Ok(LocalWriteResponse {
            local_id: write.local_id,
        })
    }

    /// Flag a record for deletion and queue the remote delete.
    pub async fn mark_local_delete(&self, target: RecordTarget) -> Result<MarkDeleteResponse> {
        require_target(&target)?;
        self.ensure_local_ids().await?;

        let now = now_millis();
        match self
            .commit(|store| store.queue_local_delete(&target, now))
            .await
        {
            Ok(write) => {
                tracing::debug!(
                    entity = %self.config.name,
                    local_id = write.local_id,
                    "Delete queued"
                );
                Ok(MarkDeleteResponse { success: true })
            }
            Err(AppError::Engine(harbor_engine::Error::RecordNotFound(_))) => {
                Ok(MarkDeleteResponse { success: false })
            }
            Err(e) => Err(e),
        }
    }

    /// Delete remotely right away when possible, otherwise queue the delete.
    ///
    /// An immediate delete removes the row and every operation still queued
    /// for it.
    pub async fn delete_now(&self, target: RecordTarget) -> Result<DeleteNowResponse> {
        require_target(&target)?;
        self.ensure_local_ids().await?;

        let resolved = {
            let state = self.state.lock().await;
            state
                .resolve(&target)
                .map(|record| (record.local_id, record.remote_id.clone()))
        };
        let Some((local_id, remote_id)) = resolved else {
            return Ok(DeleteNowResponse {
                success: false,
                queued: false,
            });
        };

        if let Some(remote_id) = remote_id.filter(|_| self.connectivity.is_online()) {
            let table = self.config.remote_table();
            match self.remote.delete(&table, &remote_id).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => {
                    let removed_ops = self
                        .commit(|store| Ok(store.purge(local_id).1))
                        .await?;
                    tracing::info!(
                        entity = %self.config.name,
                        local_id,
                        removed_ops,
                        "Deleted remotely"
                    );
                    return Ok(DeleteNowResponse {
                        success: true,
                        queued: false,
                    });
                }
                Err(e) => {
                    if e.is_unreachable() {
                        self.connectivity.set_online(false);
                    }
                    tracing::warn!(
                        entity = %self.config.name,
                        local_id,
                        "Remote delete failed, queueing instead: {}",
                        e
                    );
                }
            }
        }

        let now = now_millis();
        match self
            .commit(|store| store.queue_local_delete(&RecordTarget::local(local_id), now))
            .await
        {
            Ok(_) => Ok(DeleteNowResponse {
                success: true,
                queued: true,
            }),
            // Removed concurrently, e.g. by a refresh.
            Err(AppError::Engine(harbor_engine::Error::RecordNotFound(_))) => {
                Ok(DeleteNowResponse {
                    success: false,
                    queued: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the cache with the remote collection, keeping rows that have
    /// pending writes. A no-op while offline.
    pub async fn load_remote_snapshot_into_cache(&self) -> Result<RefreshOutcome> {
        self.ensure_local_ids().await?;

        if !self.connectivity.is_online() {
            return Ok(RefreshOutcome {
                success: true,
                count: 0,
                offline: true,
            });
        }

        let table = self.config.remote_table();
        let fetched = match self
            .remote
            .select(
                &table,
                self.config.scope.as_ref(),
                self.config.order_by.as_ref(),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                if e.is_unreachable() {
                    self.connectivity.set_online(false);
                }
                return Err(e.into());
            }
        };

        let count = fetched.len();
        let rows: Vec<_> = fetched
            .iter()
            .filter_map(|raw| match self.config.to_local_shape(raw) {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::warn!(entity = %self.config.name, "Skipping remote row: {}", e);
                    None
                }
            })
            .collect();

        let report = self
            .commit(|store| {
                let report = store.upsert_from_remote(&self.config, rows);
                reconcile::dedupe_remote_ids(store);
                Ok(report)
            })
            .await?;

        tracing::info!(
            entity = %self.config.name,
            count,
            inserted = report.inserted,
            updated = report.updated,
            removed = report.removed,
            skipped_pending = report.skipped_pending,
            "Remote snapshot loaded"
        );
        Ok(RefreshOutcome {
            success: true,
            count,
            offline: false,
        })
    }

    /// Drain the queue. Concurrent callers share one run.
    ///
    /// The run is spawned, so it finishes even if every caller goes away.
    pub async fn sync_queue(self: &Arc<Self>) -> SyncOutcome {
        let run = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.as_ref() {
                Some(run) => run.clone(),
                None => {
                    let service = Arc::clone(self);
                    let task = tokio::spawn(async move {
                        let outcome = sync::run(&service).await;
                        *service.in_flight.lock().await = None;
                        outcome
                    });

                    let service = Arc::clone(self);
                    let run = async move {
                        match task.await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                tracing::error!(
                                    entity = %service.config.name,
                                    "Sync task failed: {}",
                                    e
                                );
                                service.set_state(SyncState::Idle);
                                *service.in_flight.lock().await = None;
                                SyncOutcome::stopped(0, format!("sync task failed: {e}"))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *in_flight = Some(run.clone());
                    run
                }
            }
        };
        run.await
    }

    /// Sync progress events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Whether a run is in flight.
    pub fn sync_state(&self) -> watch::Receiver<SyncState> {
        self.run_state.subscribe()
    }
}
