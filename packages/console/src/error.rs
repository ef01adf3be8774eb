// ABOUTME: Error type for the attach bridge and console client
// ABOUTME: Maps onto HTTP statuses; NotReady is the one retryable condition

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sandpit_api::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttachError {
    #[error("sandbox {name:?} not found")]
    NotFound { name: String },

    #[error("sandbox {name:?} is not ready")]
    NotReady { name: String },

    #[error("sandbox {name:?} has no detected kind")]
    UnknownKind { name: String },

    #[error("WebSocket upgrade required")]
    UpgradeRequired,

    #[error("failed to load service secrets: {0}")]
    Secrets(#[source] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("remote console error: {0}")]
    Remote(String),

    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),

    #[error("timeout trying to connect to the sandbox")]
    Timeout,
}

impl AttachError {
    /// The one condition a connecting client is expected to retry on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttachError::NotReady { .. })
    }

    fn status(&self) -> StatusCode {
        match self {
            AttachError::NotFound { .. } => StatusCode::NOT_FOUND,
            AttachError::NotReady { .. } | AttachError::UpgradeRequired => StatusCode::BAD_REQUEST,
            AttachError::Store(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            AttachError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AttachError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_not_ready_is_retryable() {
        assert!(AttachError::NotReady {
            name: "sb".to_string()
        }
        .is_retryable());
        assert!(!AttachError::NotFound {
            name: "sb".to_string()
        }
        .is_retryable());
        assert!(!AttachError::UpgradeRequired.is_retryable());
        assert!(!AttachError::Timeout.is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        let err = AttachError::NotReady {
            name: "sb".to_string(),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err = AttachError::NotFound {
            name: "sb".to_string(),
        };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(AttachError::UpgradeRequired.status(), StatusCode::BAD_REQUEST);
    }
}
