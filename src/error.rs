//! API error taxonomy mapped to structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

/// Errors surfaced to clients. Every variant renders as a JSON body of the
/// shape `{"message": ...}` with the matching status code; storage and
/// other internal failures are logged and reported with a generic message.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid required fields (400).
    #[error("{0}")]
    BadRequest(String),
    /// Credential mismatch on login (401).
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Wrong access code for privileged registration (403).
    #[error("{0}")]
    Forbidden(String),
    /// Unknown id in the request path or body (404).
    #[error("{0}")]
    NotFound(String),
    /// Duplicate email on registration (409).
    #[error("{0}")]
    Conflict(String),
    /// Storage read/parse failure or other internal error (500).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(err) => {
                error!(error = %err, "internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}
