use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{password::PasswordError, repository::RepositoryError, storage::StorageError};

pub type ApiResult<T> = Result<T, ApiError>;

/// ApiError
///
/// The single error type handlers return. Every variant renders as
/// `{ "error": <message> }` with its status code, so clients (and the audit trail)
/// see one response shape regardless of where the failure happened.
#[derive(Error, Debug)]
pub enum ApiError {
    // ===== 400 =====
    #[error("{0}")]
    Validation(String),

    // ===== 401 =====
    /// No `Authorization` header at all.
    #[error("Missing Authorization header")]
    MissingToken,

    /// Header present but the token is malformed, expired or badly signed.
    /// The concrete validation failure is never echoed to the client.
    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid credentials")]
    InvalidCredentials,

    // ===== 404 =====
    /// Covers both "does not exist" and "exists but belongs to someone else".
    #[error("{0}")]
    NotFound(&'static str),

    // ===== 409 =====
    #[error("{0}")]
    Conflict(String),

    // ===== 413 =====
    #[error("Request body too large")]
    PayloadTooLarge,

    // ===== 500 =====
    /// The detail is logged, the client only ever sees a generic message.
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    /// Shorthand for the generic 400 used on unparseable input.
    pub fn invalid_request() -> Self {
        ApiError::Validation("Invalid request".to_string())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        ApiError::Internal(detail.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingToken | ApiError::InvalidToken | ApiError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "request failed with internal error");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(what) => ApiError::Conflict(what),
            RepositoryError::MissingReference(what) => {
                ApiError::Validation(format!("Referenced {what} does not exist"))
            }
            RepositoryError::Database(e) => ApiError::Internal(format!("database: {e}")),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Internal(format!("storage: {err}"))
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooLong { .. } => ApiError::Validation(err.to_string()),
            PasswordError::Hash(detail) => ApiError::Internal(format!("password hash: {detail}")),
        }
    }
}
