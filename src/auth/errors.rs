use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::auth::repo_types::UniqueField;

pub const INVALID_CREDENTIALS: &str = "Invalid username/email or password";

/// Failures surfaced by the credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key on {0:?}")]
    DuplicateKey(UniqueField),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                match db_err.constraint() {
                    Some("users_email_key") => return Self::DuplicateKey(UniqueField::Email),
                    Some("users_username_key") => return Self::DuplicateKey(UniqueField::Username),
                    _ => {}
                }
            }
        }
        Self::Backend(err.into())
    }
}

/// Everything the register/login boundary can answer with.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("Email already exists")]
    DuplicateEmail,
    #[error("Username already exists")]
    DuplicateUsername,
    #[error("{}", INVALID_CREDENTIALS)]
    InvalidCredentials,
    #[error("{0}")]
    Unauthorized(String),
    #[error("Server Error")]
    Server(anyhow::Error),
}

impl AuthError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::DuplicateEmail | Self::DuplicateUsername => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidCredentials | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Server(err)
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey(UniqueField::Email) => Self::DuplicateEmail,
            StoreError::DuplicateKey(UniqueField::Username) => Self::DuplicateUsername,
            StoreError::Backend(e) => Self::Server(e),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Server(e) = &self {
            error!(error = ?e, "request failed");
        }
        let body = Json(json!({ "message": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}
