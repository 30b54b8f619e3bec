//! Domain error types for the LeafScan server.
//!
//! Uses thiserror for ergonomic error handling with automatic Display implementations.

use actix_web::{HttpResponse, ResponseError};
use std::fmt;
use uuid::Uuid;

/// Application-level errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Payload is not an accepted image format
    #[error("Invalid image format: {0}")]
    InvalidFormat(String),

    /// Payload exceeds the configured size limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Image bytes could not be decoded for inference
    #[error("Image decode error: {0}")]
    Decode(String),

    /// Record already holds an automatic classification
    #[error("Diagnosis {0} is already classified")]
    AlreadyClassified(Uuid),

    /// Record has no automatic baseline to correct
    #[error("Diagnosis {0} has not been classified yet")]
    NotYetClassified(Uuid),

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Storage (S3) operation failed; transient, caller may retry
    #[error("Storage error: {0}")]
    Storage(String),

    /// Service at capacity; transient, caller may retry
    #[error("Service busy: {0}")]
    ServiceUnavailable(String),

    /// Model inference failed at runtime
    #[error("Inference error: {0}")]
    Inference(String),
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_code, response_message, retryable) = match self {
            AppError::Database(err_str) => {
                tracing::error!("Database error: {}", err_str);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                    false,
                )
            }
            AppError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                self.to_string(),
                false,
            ),
            AppError::InvalidInput(_) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                self.to_string(),
                false,
            ),
            AppError::InvalidFormat(_) => (
                StatusCode::BAD_REQUEST,
                "INVALID_FORMAT",
                self.to_string(),
                false,
            ),
            AppError::PayloadTooLarge(_) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                self.to_string(),
                false,
            ),
            AppError::Decode(_) => (
                StatusCode::BAD_REQUEST,
                "DECODE_ERROR",
                self.to_string(),
                false,
            ),
            AppError::AlreadyClassified(_) => (
                StatusCode::CONFLICT,
                "ALREADY_CLASSIFIED",
                self.to_string(),
                false,
            ),
            AppError::NotYetClassified(_) => (
                StatusCode::CONFLICT,
                "NOT_YET_CLASSIFIED",
                self.to_string(),
                false,
            ),
            AppError::Unauthorized(_) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                self.to_string(),
                false,
            ),
            AppError::Storage(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORAGE_UNAVAILABLE",
                self.to_string(),
                true,
            ),
            AppError::ServiceUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_BUSY",
                self.to_string(),
                true,
            ),
            AppError::Inference(err_str) => {
                tracing::error!("Inference error: {}", err_str);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INFERENCE_ERROR",
                    "An internal inference error occurred".to_string(),
                    false,
                )
            }
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: error_code.to_string(),
            message: response_message,
            retryable,
        })
    }
}

/// Error response body matching OpenAPI schema.
///
/// `retryable` marks transient infrastructure failures the caller may retry;
/// the server itself never retries.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

// Conversion implementations for common error types

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("Invalid UUID: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_conflict_errors_map_to_409() {
        let id = Uuid::new_v4();
        assert_eq!(
            AppError::AlreadyClassified(id).error_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::NotYetClassified(id).error_response().status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_transient_errors_map_to_503() {
        let resp = AppError::Storage("bucket unreachable".to_string()).error_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_payload_too_large_maps_to_413() {
        let resp = AppError::PayloadTooLarge("payload exceeds limit".to_string()).error_response();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
