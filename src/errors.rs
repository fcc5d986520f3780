use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::audit::AuditError;
use crate::authz::{AuthError, AuthzError};
use crate::roles::RoleStoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {message}")]
    Forbidden { message: String, required: Vec<String> },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("token error: {0}")]
    Token(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn token(err: impl Into<String>) -> Self {
        Self::Token(err.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden { .. } => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::BadRequest(_) => "bad_request",
            AppError::Configuration(_) => "configuration",
            AppError::Token(_) => "token",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<Vec<String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let AppError::Database(err) = &self {
            tracing::error!(error = %err, "database error");
        }

        let message = self.to_string();
        let error = self.kind().to_string();
        let required = match self {
            AppError::Forbidden { required, .. } if !required.is_empty() => Some(required),
            _ => None,
        };

        let payload = ErrorResponse {
            error,
            message,
            required,
        };

        (status, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::Lookup(err) => AppError::Database(err),
            other => AppError::Unauthorized(other.client_message().to_string()),
        }
    }
}

impl From<AuthzError> for AppError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Unauthenticated => AppError::unauthorized("not authenticated"),
            AuthzError::Forbidden { required, mode } => AppError::Forbidden {
                message: format!(
                    "insufficient permission: requires {} of [{}]",
                    mode.as_str(),
                    required.join(", ")
                ),
                required,
            },
        }
    }
}

impl From<RoleStoreError> for AppError {
    fn from(value: RoleStoreError) -> Self {
        match value {
            RoleStoreError::DuplicateName(_) | RoleStoreError::RoleInUse { .. } => AppError::Conflict(value.to_string()),
            RoleStoreError::RoleNotFound(_) | RoleStoreError::UserNotFound(_) => AppError::NotFound(value.to_string()),
            RoleStoreError::Invalid(message) => AppError::BadRequest(message),
            RoleStoreError::Database(err) => AppError::Database(err),
        }
    }
}

impl From<AuditError> for AppError {
    fn from(value: AuditError) -> Self {
        match value {
            AuditError::InvalidRetention(_) => AppError::BadRequest(value.to_string()),
            AuditError::Query(_) | AuditError::Retention(_) => AppError::Internal(value.to_string()),
        }
    }
}
