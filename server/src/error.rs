//! Error taxonomy shared by the store, the services and the HTTP layer

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};
use rusqlite::ErrorCode;
use shared::ErrorResponse;
use thiserror::Error;

/// Message returned to callers for any failure whose details stay in the logs
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum ScoreError {
    /// Missing or malformed input. The message is safe to show to callers.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    /// A session id that is already in the session log
    #[error("session {0} has already been recorded")]
    DuplicateSession(String),
    /// A uniquely named record that already exists
    #[error("{0} already exists")]
    AlreadyExists(String),
    /// The database stayed locked for every retry attempt
    #[error("score store is busy")]
    Busy,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ScoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            ScoreError::Validation(_) => StatusCode::BAD_REQUEST,
            ScoreError::NotFound(_) => StatusCode::NOT_FOUND,
            ScoreError::DuplicateSession(_) | ScoreError::AlreadyExists(_) => StatusCode::CONFLICT,
            ScoreError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            ScoreError::Storage(_) | ScoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failed transaction may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScoreError::Busy)
    }

    /// Text sent to the caller. Storage and internal failures are masked.
    pub fn public_message(&self) -> String {
        match self {
            ScoreError::Storage(_) | ScoreError::Internal(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            ScoreError::Busy => "Score store is busy, try again".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ScoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => ScoreError::Busy,
            _ => ScoreError::Storage(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ScoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        ScoreError::Internal(format!("blocking task failed: {}", err))
    }
}

impl IntoResponse for ScoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self);
        }
        (status, Json(ErrorResponse::new(self.public_message()))).into_response()
    }
}
