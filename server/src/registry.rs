//! Entity registry.
//!
//! Maps entity names to their configs and lazily builds one
//! [`EntityService`] per entity, all sharing the same remote, connectivity
//! flag and persistence backend.

use std::sync::Arc;

use dashmap::DashMap;
use harbor_engine::EntityConfig;
use serde::Serialize;

use crate::connectivity::Connectivity;
use crate::error::{AppError, Result};
use crate::persistence::Persistence;
use crate::remote::RemoteStore;
use crate::service::{EntityService, RefreshOutcome};
use crate::sync::SyncOutcome;

/// Sync result for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySyncResult {
    pub entity: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Refresh result for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRefreshResult {
    pub entity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RefreshOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// All configured entity types.
#[derive(Debug)]
pub struct Registry {
    configs: DashMap<String, EntityConfig>,
    services: DashMap<String, Arc<EntityService>>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Connectivity,
    persistence: Persistence,
}

impl Registry {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        persistence: Persistence,
    ) -> Self {
        Self {
            configs: DashMap::new(),
            services: DashMap::new(),
            remote,
            connectivity,
            persistence,
        }
    }

    pub fn new_shared(
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        persistence: Persistence,
    ) -> Arc<Self> {
        Arc::new(Self::new(remote, connectivity, persistence))
    }

    /// Add an entity type. Replacing a config drops its existing service.
    pub fn register(&self, config: EntityConfig) {
        let name = config.name.clone();
        if self.configs.insert(name.clone(), config).is_some() {
            self.services.remove(&name);
            tracing::warn!(entity = %name, "Entity re-registered");
        } else {
            tracing::debug!(entity = %name, "Entity registered");
        }
    }

    /// The service for an entity, built on first use.
    pub fn service(&self, name: &str) -> Result<Arc<EntityService>> {
        if let Some(service) = self.services.get(name) {
            return Ok(Arc::clone(service.value()));
        }

        let config = self
            .configs
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::UnknownEntity(name.to_string()))?;

        let service = self
            .services
            .entry(name.to_string())
            .or_insert_with(|| {
                EntityService::new_shared(
                    config,
                    Arc::clone(&self.remote),
                    self.connectivity.clone(),
                    self.persistence.clone(),
                )
            })
            .value()
            .clone();
        Ok(service)
    }

    /// Registered entity names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// Reload one entity's cache from the remote.
    pub async fn refresh(&self, name: &str) -> Result<RefreshOutcome> {
        self.service(name)?.load_remote_snapshot_into_cache().await
    }

    /// Drain every entity's queue concurrently.
    pub async fn sync_all(&self) -> Vec<EntitySyncResult> {
        let services: Vec<_> = self
            .names()
            .into_iter()
            .filter_map(|name| self.service(&name).ok().map(|service| (name, service)))
            .collect();

        let runs = services.iter().map(|(name, service)| async move {
            EntitySyncResult {
                entity: name.clone(),
                outcome: service.sync_queue().await,
            }
        });
        futures::future::join_all(runs).await
    }

    /// Reload every entity's cache from the remote.
    pub async fn refresh_all(&self) -> Vec<EntityRefreshResult> {
        let names = self.names();
        let runs = names.iter().map(|name| async move {
            match self.refresh(name).await {
                Ok(outcome) => EntityRefreshResult {
                    entity: name.clone(),
                    outcome: Some(outcome),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(entity = %name, "Refresh failed: {}", e);
                    EntityRefreshResult {
                        entity: name.clone(),
                        outcome: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        });
        futures::future::join_all(runs).await
    }
}
