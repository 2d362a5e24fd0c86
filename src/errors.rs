use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Typed failures of the Booking Operations contract.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BookingError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient backend error: {0}")]
    Transient(String),
}

impl BookingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BookingError::Transient(_))
    }
}

impl From<rusqlite::Error> for BookingError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => BookingError::NotFound("record".to_string()),
            other => BookingError::Transient(format!("database error: {other}")),
        }
    }
}

/// Failures that end a turn without a conversational recovery.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("session {session_id} belongs to organization {expected}, not {actual}")]
    OrganizationMismatch {
        session_id: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Turn(#[from] TurnError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Turn(TurnError::OrganizationMismatch { .. }) => StatusCode::CONFLICT,
            AppError::Turn(TurnError::Config(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
