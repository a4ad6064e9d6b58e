//! Harbor Server - offline-first sync sidecar.
//!
//! Hosts one [`EntityService`](service::EntityService) per configured entity
//! type. Each keeps a durable local replica with a mutation queue, serves
//! reads and writes locally, and replays queued writes against the remote
//! store when it is reachable. Exposed over HTTP and WebSocket for a local UI.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod live;
pub mod persistence;
pub mod registry;
pub mod remote;
pub mod routes;
pub mod service;
pub mod sync;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::registry::Registry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
