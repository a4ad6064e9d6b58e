//! HTTP API tests driven through the router without a listener.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use harbor_engine::EntityConfig;
use harbor_server::connectivity::Connectivity;
use harbor_server::persistence::Persistence;
use harbor_server::registry::Registry;
use harbor_server::remote::{MemoryRemote, RemoteStore};
use harbor_server::{router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> (Router, Arc<MemoryRemote>, Arc<Registry>) {
    let remote = Arc::new(MemoryRemote::new());
    let dyn_remote: Arc<dyn RemoteStore> = remote.clone();
    let registry = Registry::new_shared(
        dyn_remote,
        Connectivity::new(true),
        Persistence::memory(),
    );
    registry.register(EntityConfig::new("cases"));
    registry.register(EntityConfig::new("partners"));
    (router(AppState::new(Arc::clone(&registry))), remote, registry)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_connectivity() {
    let (app, _, registry) = app();
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["online"], true);

    registry.connectivity().set_online(false);
    let (_, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(body["online"], false);
}

#[tokio::test]
async fn write_list_and_sync() {
    let (app, remote, _) = app();

    let (status, body) = call(
        &app,
        "POST",
        "/entities/cases/rows",
        Some(json!({"payload": {"name": "A"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let local_id = body["localId"].as_u64().unwrap();

    let (_, body) = call(&app, "GET", "/entities/cases/pending", None).await;
    assert_eq!(body, json!({"count": 1}));

    let (_, body) = call(&app, "GET", "/entities", None).await;
    assert_eq!(
        body,
        json!([
            {"name": "cases", "table": "cases", "pending": 1, "state": "idle"},
            {"name": "partners", "table": "partners", "pending": 0, "state": "idle"}
        ])
    );

    let (_, body) = call(&app, "GET", "/entities/cases/rows", None).await;
    assert_eq!(body[0]["localId"], local_id);
    assert_eq!(body[0]["hasPendingWrites"], true);
    assert_eq!(body[0]["pendingAction"], "create");

    let (status, body) = call(&app, "POST", "/entities/cases/sync", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"synced": 1}));
    assert_eq!(remote.rows("cases").await.len(), 1);

    let (_, body) = call(
        &app,
        "POST",
        "/entities/cases/rows",
        Some(json!({"payload": {"name": "B"}, "localId": local_id})),
    )
    .await;
    assert_eq!(body["localId"], local_id);

    let (_, body) = call(&app, "POST", "/sync", None).await;
    assert_eq!(
        body,
        json!([
            {"entity": "cases", "synced": 1},
            {"entity": "partners", "synced": 0}
        ])
    );
    assert_eq!(remote.rows("cases").await[0]["name"], "B");
}

#[tokio::test]
async fn deletes_and_refresh() {
    let (app, remote, _) = app();
    let table = EntityConfig::new("cases").remote_table();
    remote
        .seed(&table, json!({"name": "A"}).as_object().cloned().unwrap())
        .await;
    remote
        .seed(&table, json!({"name": "B"}).as_object().cloned().unwrap())
        .await;

    let (_, body) = call(&app, "POST", "/entities/cases/refresh", None).await;
    assert_eq!(body, json!({"success": true, "count": 2}));

    let (_, body) = call(
        &app,
        "POST",
        "/entities/cases/mark-delete",
        Some(json!({"targetId": 1})),
    )
    .await;
    assert_eq!(body, json!({"success": true}));

    let (_, body) = call(
        &app,
        "POST",
        "/entities/cases/delete-now",
        Some(json!({"targetId": "2"})),
    )
    .await;
    assert_eq!(body, json!({"success": true, "queued": false}));

    let (_, body) = call(&app, "GET", "/entities/cases/rows", None).await;
    assert_eq!(body, json!([]));
    assert_eq!(remote.rows("cases").await.len(), 1);

    let (_, body) = call(
        &app,
        "POST",
        "/entities/cases/mark-delete",
        Some(json!({"localId": 99})),
    )
    .await;
    assert_eq!(body, json!({"success": false}));

    let (status, body) = call(&app, "POST", "/entities/cases/delete-now", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request: a localId or targetId is required");
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let (app, remote, _) = app();

    let (status, body) = call(&app, "GET", "/entities/unknown/rows", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Unknown entity: unknown");

    let (status, _) = call(
        &app,
        "POST",
        "/entities/cases/rows",
        Some(json!({"payload": "text"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "POST",
        "/entities/cases/rows",
        Some(json!({"payload": {"name": "A"}, "localId": 42})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    remote.set_reachable(false).await;
    let (status, body) = call(&app, "POST", "/entities/cases/refresh", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Remote store error");

    // Now offline: refresh is a no-op rather than an error.
    let (status, body) = call(&app, "POST", "/entities/cases/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "count": 0, "offline": true}));
}
