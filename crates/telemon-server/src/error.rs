use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use telemon_common::crypto::EnvelopeError;
use telemon_common::types::ValidationError;
use telemon_storage::StorageError;

/// Error taxonomy shared by the HTTP and gRPC surfaces.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ServiceError::Unavailable(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn err_code(&self) -> i32 {
        match self {
            ServiceError::InvalidArgument(_) => 1001,
            ServiceError::NotFound(_) => 1004,
            ServiceError::PermissionDenied(_) => 1006,
            ServiceError::Unavailable(_) => 1503,
            ServiceError::Internal(_) => 1500,
        }
    }

    /// Attaches the request's trace id for the error body.
    pub fn traced(self, trace_id: &str) -> TracedError {
        TracedError {
            trace_id: trace_id.to_owned(),
            error: self,
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(e: ValidationError) -> Self {
        ServiceError::InvalidArgument(e.to_string())
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => ServiceError::NotFound(e.to_string()),
            StorageError::Unavailable(_) => ServiceError::Unavailable(e.to_string()),
            _ => ServiceError::Internal(e.to_string()),
        }
    }
}

impl From<EnvelopeError> for ServiceError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Base64(_) | EnvelopeError::MacMismatch => {
                ServiceError::InvalidArgument(e.to_string())
            }
            _ => ServiceError::Internal(e.to_string()),
        }
    }
}

impl From<ServiceError> for tonic::Status {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            ServiceError::NotFound(msg) => tonic::Status::not_found(msg),
            ServiceError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            ServiceError::Unavailable(msg) => tonic::Status::unavailable(msg),
            ServiceError::Internal(msg) => tonic::Status::internal(msg),
        }
    }
}

/// JSON error body.
#[derive(Serialize)]
pub struct ApiError {
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
}

/// A [`ServiceError`] bound to the request it failed.
#[derive(Debug)]
pub struct TracedError {
    pub trace_id: String,
    pub error: ServiceError,
}

impl IntoResponse for TracedError {
    fn into_response(self) -> Response {
        (
            self.error.status(),
            Json(ApiError {
                err_code: self.error.err_code(),
                err_msg: self.error.to_string(),
                trace_id: self.trace_id,
            }),
        )
            .into_response()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        self.traced("").into_response()
    }
}
