//! API error types.

use crate::ingest::{IngestError, ValidationError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("storage error: {0}")]
    Storage(#[from] tessera_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] tessera_metadata::MetadataError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
            Self::Ingest(e) => e.code(),
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Ingest(e) => match e {
                IngestError::Validation(ValidationError::LengthRequired) => {
                    StatusCode::LENGTH_REQUIRED
                }
                IngestError::Validation(ValidationError::PayloadTooLarge { .. }) => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                IngestError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                IngestError::NotFound(_) => StatusCode::NOT_FOUND,
                IngestError::Integrity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                IngestError::Conflict(_) => StatusCode::CONFLICT,
                IngestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                IngestError::BodyRead(_) => StatusCode::BAD_REQUEST,
            },
            Self::Storage(e) => match e {
                tessera_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                tessera_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                tessera_metadata::MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
