//! Online/offline tracking.
//!
//! A shared flag with change notification. The probe task pings the remote on
//! an interval; when the flag flips from offline to online it drains every
//! queue and then refreshes every cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::registry::Registry;
use crate::remote::RemoteStore;

/// Shared connectivity state.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the flag. Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
        changed
    }

    /// Watch for changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Ping the remote and record the result. Returns true when this probe
    /// brought the connection back.
    pub async fn probe(&self, remote: &dyn RemoteStore) -> bool {
        let online = match remote.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Connectivity probe failed: {}", e);
                false
            }
        };
        self.set_online(online) && online
    }
}

/// Spawn the periodic probe. On reconnect it runs a sync pass followed by a
/// refresh pass over every registered entity.
pub fn spawn_probe(registry: Arc<Registry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if registry
                .connectivity()
                .probe(registry.remote().as_ref())
                .await
            {
                tracing::info!("Connection restored, draining queues");
                registry.sync_all().await;
                registry.refresh_all().await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;

    #[test]
    fn set_online_reports_changes() {
        let connectivity = Connectivity::new(false);
        assert!(!connectivity.is_online());
        assert!(connectivity.set_online(true));
        assert!(!connectivity.set_online(true));
        assert!(connectivity.is_online());
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let connectivity = Connectivity::new(true);
        let mut rx = connectivity.subscribe();

        connectivity.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }

    #[tokio::test]
    async fn probe_detects_reconnect() {
        let remote = MemoryRemote::new();
        let connectivity = Connectivity::new(true);

        remote.set_reachable(false).await;
        assert!(!connectivity.probe(&remote).await);
        assert!(!connectivity.is_online());

        remote.set_reachable(true).await;
        assert!(connectivity.probe(&remote).await);
        assert!(!connectivity.probe(&remote).await);
        assert!(connectivity.is_online());
    }
}
