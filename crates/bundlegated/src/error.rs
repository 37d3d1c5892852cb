//! JSON error responses for the API routes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bundlegate_core::PromoteError;
use bundlegate_ingest::IngestError;
use bundlegate_state::StateError;
use serde_json::json;

/// Error body: `{"error": <code>, "message": <text>}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(event = "api.error", code = self.code, error = %self.message);
        }
        (
            self.status,
            Json(json!({ "error": self.code, "message": self.message })),
        )
            .into_response()
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        let (status, code) = match &err {
            StateError::BuildNotFound(_) | StateError::ListingNotFound(_) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            StateError::InvalidId(_) => (StatusCode::BAD_REQUEST, "BUILD_INVALID_ID"),
            StateError::InvalidTransition { .. } | StateError::NotDeleted(_) => {
                (StatusCode::CONFLICT, "BUILD_INVALID_TRANSITION")
            }
            StateError::LeaseHeld { .. } | StateError::LeaseRejected { .. } => {
                (StatusCode::CONFLICT, "BUILD_LEASED")
            }
            StateError::BuildExists(_) => (StatusCode::CONFLICT, "BUILD_EXISTS"),
            StateError::Io(_) | StateError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "BUILD_STATE_ERROR")
            }
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<PromoteError> for ApiError {
    fn from(err: PromoteError) -> Self {
        let status = match &err {
            PromoteError::State(inner) => return ApiError::from_state_ref(inner, err.code()),
            PromoteError::InvalidId(_) => StatusCode::BAD_REQUEST,
            PromoteError::NotPublishable { .. } => StatusCode::CONFLICT,
            PromoteError::RequiredFileMissing { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.code(), err.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        let status = match &err {
            IngestError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            IngestError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.code(), err.to_string())
    }
}

impl ApiError {
    /// Status of a wrapped state error, keeping the outer code.
    fn from_state_ref(inner: &StateError, code: &'static str) -> Self {
        let status = if inner.is_not_found() {
            StatusCode::NOT_FOUND
        } else if matches!(
            inner,
            StateError::LeaseHeld { .. } | StateError::LeaseRejected { .. }
        ) {
            StatusCode::CONFLICT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, code, inner.to_string())
    }
}
