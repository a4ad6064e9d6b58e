//! Queue draining.
//!
//! Operations are replayed one at a time in FIFO order. Each remote round
//! trip finishes, and its result is committed locally, before the next
//! operation starts. The first failure is recorded on its record and ends the
//! run; the operation stays queued for the next attempt.

use harbor_engine::{OperationType, QueuedOperation, RemoteId};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::remote::RemoteError;
use crate::service::EntityService;

/// Result of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    /// Operations confirmed in this run
    pub synced: usize,
    /// Message of the failure that stopped the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when the run was skipped because the remote is unreachable
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub offline: bool,
}

impl SyncOutcome {
    fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    pub(crate) fn stopped(synced: usize, error: String) -> Self {
        Self {
            synced,
            error: Some(error),
            offline: false,
        }
    }
}

/// Progress events published while a run is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncStatus {
    Started { pending: usize },
    Progress { synced: usize, pending: usize },
    Completed { synced: usize },
    Stopped { synced: usize, error: String },
    Offline,
}

/// Whether a run is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    #[default]
    Idle,
    Draining,
}

/// Drain the service's queue once.
pub(crate) async fn run(service: &EntityService) -> SyncOutcome {
    let entity = service.config().name.clone();

    if let Err(e) = service.ensure_local_ids().await {
        tracing::error!(entity = %entity, "Sync aborted, local state unavailable: {}", e);
        return SyncOutcome::stopped(0, e.to_string());
    }

    if !service.connectivity().is_online() {
        tracing::debug!(entity = %entity, "Sync skipped while offline");
        service.emit(SyncStatus::Offline);
        return SyncOutcome::offline();
    }

    let ops = service.queued_operations().await;
    if ops.is_empty() {
        return SyncOutcome::default();
    }

    service.set_state(SyncState::Draining);
    service.emit(SyncStatus::Started { pending: ops.len() });
    tracing::info!(entity = %entity, pending = ops.len(), "Sync started");

    let mut synced = 0;
    for queued in ops {
        // Skip operations removed since the run started (e.g. by delete_now).
        let Some((op, remote_target)) = service.current_operation(queued.queue_id).await else {
            continue;
        };

        match execute(service, &op, remote_target).await {
            Ok(()) => {
                synced += 1;
                let pending = service.pending_now().await;
                tracing::debug!(
                    entity = %entity,
                    queue_id = op.queue_id,
                    local_id = op.target_local_id,
                    op = %op.operation_type,
                    "Operation synced"
                );
                service.emit(SyncStatus::Progress { synced, pending });
            }
            Err(e) => {
                let message = e.to_string();
                if matches!(&e, AppError::Remote(remote) if remote.is_unreachable()) {
                    service.connectivity().set_online(false);
                }
                service.flag_sync_error(op.target_local_id, &message).await;

                tracing::warn!(
                    entity = %entity,
                    queue_id = op.queue_id,
                    local_id = op.target_local_id,
                    synced,
                    "Sync stopped: {}",
                    message
                );
                service.emit(SyncStatus::Stopped {
                    synced,
                    error: message.clone(),
                });
                service.set_state(SyncState::Idle);
                return SyncOutcome::stopped(synced, message);
            }
        }
    }

    tracing::info!(entity = %entity, synced, "Sync completed");
    service.emit(SyncStatus::Completed { synced });
    service.set_state(SyncState::Idle);
    SyncOutcome {
        synced,
        ..SyncOutcome::default()
    }
}

/// Send one operation and commit its result.
async fn execute(
    service: &EntityService,
    op: &QueuedOperation,
    remote_target: Option<RemoteId>,
) -> Result<()> {
    let config = service.config();
    let table = config.remote_table();
    let remote = service.remote();

    match op.operation_type {
        OperationType::Create => {
            let stored = remote.insert(&table, &op.payload).await?;
            let row = config.to_local_shape(&stored)?;
            service
                .commit(|store| {
                    store.confirm_synced(config, op, row);
                    Ok(())
                })
                .await
        }
        OperationType::Update => {
            let remote_id = remote_target
                .ok_or(harbor_engine::Error::MissingRemoteId(op.target_local_id))?;
            let stored = remote.update(&table, &remote_id, &op.payload).await?;
            let row = config.to_local_shape(&stored)?;
            service
                .commit(|store| {
                    store.confirm_synced(config, op, row);
                    Ok(())
                })
                .await
        }
        OperationType::Delete => {
            if let Some(remote_id) = remote_target {
                match remote.delete(&table, &remote_id).await {
                    Ok(()) | Err(RemoteError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            service
                .commit(|store| {
                    store.confirm_delete(op);
                    Ok(())
                })
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_serialization() {
        let outcome = SyncOutcome {
            synced: 2,
            ..SyncOutcome::default()
        };
        assert_eq!(serde_json::to_value(&outcome).unwrap(), json!({"synced": 2}));

        let outcome = SyncOutcome::stopped(1, "boom".into());
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"synced": 1, "error": "boom"})
        );

        assert_eq!(
            serde_json::to_value(SyncOutcome::offline()).unwrap(),
            json!({"synced": 0, "offline": true})
        );
    }

    #[test]
    fn status_serialization() {
        let status = SyncStatus::Progress {
            synced: 1,
            pending: 3,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"state": "progress", "synced": 1, "pending": 3})
        );
    }
}
