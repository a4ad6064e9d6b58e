//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded with a snake_case `type` tag. Payloads
//! reuse the camelCase HTTP shapes.

use harbor_engine::CachedRecord;
use serde::{Deserialize, Serialize};

use crate::service::RefreshOutcome;
use crate::sync::{SyncOutcome, SyncStatus};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Drain this entity's queue.
    Sync {
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Reload this entity's cache from the remote.
    Refresh {
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The visible rows. Sent on connect and after every change.
    Rows { rows: Vec<CachedRecord> },

    /// Sync progress event.
    Status { status: SyncStatus },

    /// Response to a sync request.
    SyncResult {
        outcome: SyncOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to a refresh request.
    RefreshResult {
        outcome: RefreshOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
        /// Request ID from the original request (if applicable)
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }

    pub fn rows(rows: &[CachedRecord]) -> Self {
        ServerMessage::Rows {
            rows: rows.to_vec(),
        }
    }
}
