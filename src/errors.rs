use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

/// Standard error body for HTTP responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unauthorized",
    "message": "webhook signature verification failed",
    "timestamp": "2025-06-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Unauthorized", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Service-level error taxonomy.
///
/// Verification and normalization failures never reach the state machine;
/// state-machine conflicts are absorbed by the reconciler and surfaced only
/// through the audit endpoints, never through this type.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Bad or missing webhook signature. Hard reject, no side effect.
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    /// Payload violates the provider schema. Reject, no side effect.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Optimistic write lost the race; callers re-read and re-apply.
    #[error("concurrent modification of order {0}")]
    ConcurrentModification(Uuid),

    /// Ledger or store unreachable; the provider should retry.
    #[error("transient infrastructure failure: {0}")]
    TransientInfraFailure(String),

    /// Reconciliation exceeded its processing budget; retryable.
    #[error("processing timeout: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("external service error: {0}")]
    ExternalServiceError(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationFailure(_) => StatusCode::UNAUTHORIZED,
            Self::MalformedPayload(_) | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            // Retryable: the provider's delivery loop keys off 5xx.
            Self::TransientInfraFailure(_) | Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::TransientInfraFailure(_) => "Service temporarily unavailable".to_string(),
            Self::Timeout(_) => "Processing timed out; retry later".to_string(),
            _ => self.to_string(),
        }
    }

    /// True when the caller is expected to redeliver the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientInfraFailure(_) | Self::Timeout(_))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(err)).into_response()
    }
}
