//! Live view over a WebSocket.
//!
//! On connect the client receives the current rows, then a `rows` message on
//! every change and a `status` message for every sync event. Sync and refresh
//! requests run in their own tasks so pushes keep flowing while they do.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

use crate::live::LiveView;
use crate::service::EntityService;
use crate::websocket::{ClientMessage, ServerMessage};

/// Handle an established WebSocket connection for one entity.
pub async fn handle_live_connection(
    socket: WebSocket,
    service: Arc<EntityService>,
    mut view: LiveView,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let entity = service.config().name.clone();

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    tracing::info!(conn_id = %conn_id, entity = %entity, "WebSocket client connected");

    // Forward outgoing messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    let mut status = service.subscribe_status();
    let _ = tx.send(ServerMessage::rows(&view.current()));

    loop {
        tokio::select! {
            rows = view.changed() => match rows {
                Some(rows) => {
                    let _ = tx.send(ServerMessage::rows(&rows));
                }
                None => break,
            },
            event = status.recv() => match event {
                Ok(status) => {
                    let _ = tx.send(ServerMessage::Status { status });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(conn_id = %conn_id, skipped, "Status events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    process_message(&text, &service, &tx);
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!("Binary messages not supported");
                }
                Some(Ok(Message::Ping(data))) => {
                    tracing::trace!("Received ping: {} bytes", data.len());
                }
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!("Received pong");
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                    break;
                }
            },
        }
    }

    send_task.abort();
    tracing::info!(conn_id = %conn_id, entity = %entity, "WebSocket client disconnected");
}

/// Dispatch a client message. Responses go through `tx`.
fn process_message(
    text: &str,
    service: &Arc<EntityService>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            let _ = tx.send(ServerMessage::error(
                format!("Invalid message format: {}", e),
                None,
            ));
            return;
        }
    };

    match client_msg {
        ClientMessage::Sync { request_id } => {
            let service = Arc::clone(service);
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = service.sync_queue().await;
                let _ = tx.send(ServerMessage::SyncResult {
                    outcome,
                    request_id,
                });
            });
        }
        ClientMessage::Refresh { request_id } => {
            let service = Arc::clone(service);
            let tx = tx.clone();
            tokio::spawn(async move {
                let response = match service.load_remote_snapshot_into_cache().await {
                    Ok(outcome) => ServerMessage::RefreshResult {
                        outcome,
                        request_id,
                    },
                    Err(e) => ServerMessage::error(e.to_string(), request_id),
                };
                let _ = tx.send(response);
            });
        }
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
    }
}
