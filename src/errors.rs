use crate::{services::upload_manager::UploadError, storage::BackendError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

/// Map lifecycle errors to their HTTP equivalents. Client-correctable
/// reasons stay specific (expired vs forbidden vs not found) so the caller
/// can decide between restarting the upload and retrying one call.
impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::InvalidInput(_) | UploadError::InvalidPart { .. } => {
                StatusCode::BAD_REQUEST
            }
            UploadError::QuotaExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            UploadError::SessionExpired(_) => StatusCode::GONE,
            UploadError::SessionNotActive { .. } => StatusCode::CONFLICT,
            UploadError::Forbidden => StatusCode::FORBIDDEN,
            UploadError::Backend(backend) => backend_status(backend),
            UploadError::Sqlx(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        AppError::new(backend_status(&err), err.to_string())
    }
}

fn backend_status(err: &BackendError) -> StatusCode {
    match err {
        BackendError::InvalidPart(_) => StatusCode::BAD_REQUEST,
        // Consistency failure: the caller should re-drive part
        // confirmation, not blindly retry finalize.
        BackendError::IncompleteParts { .. } | BackendError::FinalizeConflict(_) => {
            StatusCode::CONFLICT
        }
        BackendError::Unavailable(_) => StatusCode::BAD_GATEWAY,
        BackendError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
