//! Per-entity endpoints.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use harbor_engine::RecordTarget;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::live::Rows;
use crate::registry::EntitySyncResult;
use crate::service::{
    DeleteNowResponse, LocalWriteRequest, LocalWriteResponse, MarkDeleteResponse, RefreshOutcome,
};
use crate::sync::{SyncOutcome, SyncState};
use crate::websocket::handle_live_connection;
use crate::AppState;

/// One entry of the entity listing.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    pub name: String,
    pub table: String,
    pub pending: usize,
    pub state: SyncState,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    pub count: usize,
}

/// Create entity routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/entities", get(list_entities))
        .route("/entities/{entity}/rows", get(rows).post(write_local))
        .route("/entities/{entity}/pending", get(pending))
        .route("/entities/{entity}/mark-delete", post(mark_delete))
        .route("/entities/{entity}/delete-now", post(delete_now))
        .route("/entities/{entity}/refresh", post(refresh))
        .route("/entities/{entity}/sync", post(sync_entity))
        .route("/entities/{entity}/live", get(live))
        .route("/sync", post(sync_all))
}

/// GET /entities - Registered entities with their pending counts.
async fn list_entities(State(state): State<AppState>) -> Result<Json<Vec<EntitySummary>>> {
    let mut summaries = Vec::new();
    for name in state.registry.names() {
        let service = state.registry.service(&name)?;
        let pending = service.pending_operation_count().await?;
        let sync_state = *service.sync_state().borrow();
        summaries.push(EntitySummary {
            table: service.config().table.clone(),
            pending,
            state: sync_state,
            name,
        });
    }
    Ok(Json(summaries))
}

/// GET /entities/{entity}/rows - Current live view.
async fn rows(State(state): State<AppState>, Path(entity): Path<String>) -> Result<Json<Rows>> {
    let service = state.registry.service(&entity)?;
    Ok(Json(service.rows().await?))
}

/// POST /entities/{entity}/rows - Create or update locally.
async fn write_local(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(request): Json<LocalWriteRequest>,
) -> Result<Json<LocalWriteResponse>> {
    let service = state.registry.service(&entity)?;
    Ok(Json(service.create_or_update_local(request).await?))
}

/// GET /entities/{entity}/pending - Queued operation count.
async fn pending(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<PendingResponse>> {
    let service = state.registry.service(&entity)?;
    Ok(Json(PendingResponse {
        count: service.pending_operation_count().await?,
    }))
}

/// POST /entities/{entity}/mark-delete - Queue a delete.
async fn mark_delete(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(target): Json<RecordTarget>,
) -> Result<Json<MarkDeleteResponse>> {
    let service = state.registry.service(&entity)?;
    Ok(Json(service.mark_local_delete(target).await?))
}

/// POST /entities/{entity}/delete-now - Delete remotely, or queue when offline.
async fn delete_now(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(target): Json<RecordTarget>,
) -> Result<Json<DeleteNowResponse>> {
    let service = state.registry.service(&entity)?;
    Ok(Json(service.delete_now(target).await?))
}

/// POST /entities/{entity}/refresh - Reload from the remote.
async fn refresh(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<RefreshOutcome>> {
    Ok(Json(state.registry.refresh(&entity).await?))
}

/// POST /entities/{entity}/sync - Drain this entity's queue.
async fn sync_entity(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<SyncOutcome>> {
    let service = state.registry.service(&entity)?;
    Ok(Json(service.sync_queue().await))
}

/// POST /sync - Drain every queue.
async fn sync_all(State(state): State<AppState>) -> Json<Vec<EntitySyncResult>> {
    Json(state.registry.sync_all().await)
}

/// GET /entities/{entity}/live - WebSocket live view.
async fn live(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let service = state.registry.service(&entity)?;
    let view = service.live_query().await?;
    Ok(ws.on_upgrade(move |socket| handle_live_connection(socket, service, view)))
}
