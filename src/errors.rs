use crate::services::{authorizer::AuthError, storage_service::StorageError};
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

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 403 Forbidden
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
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

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::forbidden(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound { .. } => AppError::not_found(err.to_string()),
            StorageError::InvalidBucketName { .. } | StorageError::InvalidObjectKey { .. } => {
                AppError::bad_request(err.to_string())
            }
            StorageError::CorruptIndex(_) | StorageError::Io(_) => {
                tracing::error!("storage failure: {}", err);
                AppError::internal("internal storage error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn storage_errors_map_to_status_classes() {
        let not_found: AppError = StorageError::ObjectNotFound {
            bucket: "b1".into(),
            key: "f.txt".into(),
        }
        .into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);

        let invalid: AppError = StorageError::InvalidObjectKey {
            key: "a/b".into(),
            reason: "bad".into(),
        }
        .into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

        let io: AppError = StorageError::Io(io::Error::other("/secret/path is full")).into();
        assert_eq!(io.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!io.message.contains("/secret/path"));
    }

    #[test]
    fn auth_errors_are_forbidden_and_uniform() {
        let err: AppError = AuthError::Denied.into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.message, "Invalid or expired signature");
    }
}
