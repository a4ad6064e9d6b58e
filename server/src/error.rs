//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::remote::RemoteError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] harbor_engine::Error),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Engine(harbor_engine::Error::RecordNotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Engine(_) => StatusCode::BAD_REQUEST,
            AppError::Remote(e) if e.is_unreachable() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Remote(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) | AppError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::UnknownEntity(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_message, details) = match &self {
            AppError::Storage(e) => {
                tracing::error!("Storage error: {:?}", e);
                ("Local storage error".to_string(), Some(e.to_string()))
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {:?}", e);
                ("Serialization error".to_string(), Some(e.to_string()))
            }
            AppError::Remote(e) => {
                tracing::warn!("Remote error: {}", e);
                ("Remote store error".to_string(), Some(e.to_string()))
            }
            AppError::Engine(e) => {
                tracing::debug!("Engine error: {}", e);
                (e.to_string(), None)
            }
            other => (other.to_string(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            AppError::from(harbor_engine::Error::RecordNotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(harbor_engine::Error::MissingRemoteId(1)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(RemoteError::Unreachable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(RemoteError::Rejected("constraint".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::UnknownEntity("ghosts".into()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn remote_errors_display_transparently() {
        let err = AppError::from(RemoteError::Unreachable("connection refused".into()));
        assert_eq!(err.to_string(), "remote store unreachable: connection refused");
    }
}
