//! Error responses for the HTTP layer.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use shoal_core::TransferError;

/// Failure of an API request, rendered as a JSON error body.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub TransferError);

impl ApiError {
    /// Status code for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TransferError::NotFound { .. }
            | TransferError::FileNotFound { .. }
            | TransferError::InvalidIndex { .. } => StatusCode::NOT_FOUND,
            TransferError::InvalidIdentifier { .. } | TransferError::EngineRejected { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            TransferError::AlreadyStarted { .. } | TransferError::AlreadyStopped { .. } => {
                StatusCode::CONFLICT
            }
            TransferError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
            TransferError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            TransferError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {:?}", self.0);
        } else {
            tracing::debug!("Request rejected with {}: {}", status, self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Errors that stop the server itself.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("Failed to bind {address}")]
    Bind {
        address: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server terminated")]
    Serve(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use shoal_core::InfoHash;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let info_hash = InfoHash::new([1u8; 20]);
        let cases = [
            (TransferError::NotFound { info_hash }, StatusCode::NOT_FOUND),
            (
                TransferError::InvalidIndex { info_hash, index: 9 },
                StatusCode::NOT_FOUND,
            ),
            (
                TransferError::InvalidIdentifier {
                    reason: "short".to_string(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                TransferError::AlreadyStopped {
                    subject: info_hash.to_hex(),
                },
                StatusCode::CONFLICT,
            ),
            (
                TransferError::Unsupported {
                    operation: "stop file",
                },
                StatusCode::NOT_IMPLEMENTED,
            ),
            (
                TransferError::EngineUnavailable,
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError(error).status(), expected);
        }
    }
}
