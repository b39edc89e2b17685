use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    AuthError(String),
    /// A permission predicate answered false. Carries the page the client should go back to.
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String, redirect: String },
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    ValidationError(String),
    /// A referenced group or user no longer exists.
    #[error("Invalid reference: {message}")]
    ReferentialError { message: String, redirect: String },
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn denied(message: impl Into<String>, redirect: impl Into<String>) -> Self {
        AppError::PermissionDenied {
            message: message.into(),
            redirect: redirect.into(),
        }
    }

    pub fn dangling(message: impl Into<String>, redirect: impl Into<String>) -> Self {
        AppError::ReferentialError {
            message: message.into(),
            redirect: redirect.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::PermissionDenied { message, redirect } => {
                tracing::warn!(%redirect, "permission denied: {}", message);
                (
                    StatusCode::FORBIDDEN,
                    json!({ "error": message, "redirect": redirect }),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::ReferentialError { message, redirect } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": message, "redirect": redirect }),
            ),
            AppError::SqlxError(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Database error" }),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
