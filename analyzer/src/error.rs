//! Service error taxonomy and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::catalog::CatalogError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing or malformed required field on a synchronous request.
    #[error("{0}")]
    InvalidInput(String),

    /// Worker trigger payload that cannot be used. The task id may be unknown.
    #[error("Event parsing failed: {0}")]
    InvalidPayload(String),

    /// The analysis catalog has nothing for this domain.
    #[error("Client doesn't exist")]
    DomainNotRecognized { domain: String },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),

    /// The analysis collaborator failed; the message is passed through.
    #[error("{0}")]
    UpstreamFailure(String),

    #[error("Failed to trigger worker: {0}")]
    InvokeFailed(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::InvalidPayload(_) => "INVALID_PAYLOAD",
            AppError::DomainNotRecognized { .. } => "DOMAIN_NOT_RECOGNIZED",
            AppError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            AppError::UpstreamFailure(_) => "UPSTREAM_FAILURE",
            AppError::InvokeFailed(_) => "INVOKE_FAILED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) | AppError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            AppError::DomainNotRecognized { .. } => StatusCode::NOT_FOUND,
            AppError::StorageUnavailable(_) | AppError::InvokeFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(e: CatalogError) -> Self {
        AppError::UpstreamFailure(e.0)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = if status.is_server_error() {
            json!({
                "message": "Internal server error",
                "error": self.to_string(),
                "code": self.code(),
            })
        } else {
            json!({
                "message": self.to_string(),
                "code": self.code(),
            })
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_message_and_status() {
        let err = AppError::DomainNotRecognized {
            domain: "unknown-domain.test".to_string(),
        };
        assert_eq!(err.to_string(), shared_types::CLIENT_NOT_FOUND_MESSAGE);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::InvalidInput("URL is required".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::StorageUnavailable(StoreError::Database("locked".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::UpstreamFailure("catalog offline".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
