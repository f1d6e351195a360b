//! HTTP error mapping.

use api_shared::{AuthError, ErrorRes};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dinkes_core::MergeError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(#[from] AuthError),
    #[error("{0}")]
    BadRequest(String),
    #[error("session '{0}' not found")]
    SessionNotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<MergeError> for ApiError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::InvalidInput(_)
            | MergeError::Text(_)
            | MergeError::Uuid(_)
            | MergeError::NotConfigured(_) => ApiError::BadRequest(err.to_string()),
            MergeError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            MergeError::NoDataAvailable { .. } => ApiError::Unavailable(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(detail) => {
                tracing::error!("internal error: {}", detail);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Internal details stay in the log.
        let error = match &self {
            ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(ErrorRes { error })).into_response()
    }
}
