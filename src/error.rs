// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Machine-readable codes for failures tied to a third-party identity.
///
/// Clients use these to tell "no such external login" apart from an
/// ordinary authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThirdPartyCode {
    /// The provider rejected the credential.
    InvalidCredential,
    /// The provider did not expose an email address for the account.
    EmailMissing,
    /// No local account is linked to the external identity.
    UserNotFound,
    /// A local account already exists for the external identity's email.
    UserAlreadyExists,
}

impl ThirdPartyCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ThirdPartyCode::InvalidCredential => "auth/firebase-invalid-credential",
            ThirdPartyCode::EmailMissing => "auth/firebase-email-missing",
            ThirdPartyCode::UserNotFound => "auth/firebase-user-not-found",
            ThirdPartyCode::UserAlreadyExists => "auth/firebase-user-exists",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ThirdPartyCode::InvalidCredential => StatusCode::UNAUTHORIZED,
            ThirdPartyCode::EmailMissing => StatusCode::BAD_REQUEST,
            ThirdPartyCode::UserNotFound => StatusCode::NOT_FOUND,
            ThirdPartyCode::UserAlreadyExists => StatusCode::CONFLICT,
        }
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Failure tied to an external identity; `uid` is kept for cleanup and audit.
    #[error("{message}")]
    ThirdParty {
        code: ThirdPartyCode,
        message: String,
        uid: Option<String>,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        AppError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn third_party(
        code: ThirdPartyCode,
        message: impl Into<String>,
        uid: Option<String>,
    ) -> Self {
        AppError::ThirdParty {
            code,
            message: message.into(),
            uid,
        }
    }

    /// HTTP status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ThirdParty { code, .. } => code.status(),
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code, when the error carries one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            AppError::ThirdParty { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Provider uid attached to a third-party failure.
    pub fn third_party_uid(&self) -> Option<&str> {
        match self {
            AppError::ThirdParty { uid, .. } => uid.as_deref(),
            _ => None,
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let (error, message) = match &self {
            AppError::Unauthorized(msg) => ("unauthorized", Some(msg.clone())),
            AppError::Forbidden(msg) => ("forbidden", Some(msg.clone())),
            AppError::Conflict(msg) => ("conflict", Some(msg.clone())),
            AppError::NotFound(msg) => ("not_found", Some(msg.clone())),
            AppError::TooManyRequests(msg) => ("too_many_requests", Some(msg.clone())),
            AppError::BadRequest(msg) => ("bad_request", Some(msg.clone())),
            AppError::ThirdParty { message, .. } => ("third_party_auth", Some(message.clone())),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                ("database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                ("internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for services and handlers
pub type Result<T> = std::result::Result<T, AppError>;
