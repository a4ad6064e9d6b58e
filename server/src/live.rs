//! Push-based view over a replica.

use std::sync::Arc;

use harbor_engine::CachedRecord;
use tokio::sync::watch;

/// Immutable list of visible records, shared between subscribers.
pub type Rows = Arc<Vec<CachedRecord>>;

/// A subscription to one entity's visible rows.
///
/// A new list is published after every committed change that alters what
/// readers see, including sync and refresh.
#[derive(Debug, Clone)]
pub struct LiveView {
    rx: watch::Receiver<Rows>,
}

impl LiveView {
    pub(crate) fn new(rx: watch::Receiver<Rows>) -> Self {
        Self { rx }
    }

    /// The latest rows.
    pub fn current(&self) -> Rows {
        self.rx.borrow().clone()
    }

    /// Wait for the next published list. `None` once the service is gone.
    pub async fn changed(&mut self) -> Option<Rows> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
