use axum::{
    Json,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::notify::TransportError;

/// Why a bearer credential could not be turned into an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Not authorized to access this route")]
    Missing,
    #[error("Not authorized to access this route")]
    Invalid,
    #[error("Session has expired, please log in again")]
    Expired,
    #[error("User not found")]
    UserNotFound,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing => "AuthMissing",
            Self::Invalid => "AuthInvalid",
            Self::Expired => "AuthExpired",
            Self::UserNotFound => "UserNotFound",
        }
    }
}

/// Every failure a handler can surface. Components return these (or
/// `anyhow::Error`, which becomes `Persistence`) and the boundary maps them to
/// status codes in one place.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("This email is already registered")]
    DuplicateEmail,
    #[error("Invalid or expired verification token")]
    InvalidToken,
    #[error("Invalid or expired verification token")]
    TokenExpired,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Not authorized to perform this action")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    InvalidFile(String),
    #[error("Failed to send verification email. Please try again.")]
    Transport(#[from] TransportError),
    #[error("Server Error")]
    Persistence(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::DuplicateEmail
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::InvalidFile(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Transport(_) | Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name, returned alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::DuplicateEmail => "DuplicateEmail",
            Self::InvalidToken => "InvalidToken",
            Self::TokenExpired => "TokenExpired",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::Auth(e) => e.code(),
            Self::Forbidden => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::InvalidFile(_) => "InvalidFile",
            Self::Transport(_) => "TransportError",
            Self::Persistence(_) => "PersistenceError",
        }
    }

    /// Diagnostic text for server-side failures. Only reaches the client when
    /// the `expose_error_details` layer is installed.
    fn details(&self) -> Option<String> {
        match self {
            Self::Transport(e) => Some(e.to_string()),
            Self::Persistence(e) => Some(format!("{:#}", e)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Response extension carrying the full error body, picked up by
/// `expose_error_details`.
#[derive(Debug, Clone)]
struct ErrorDetails(ErrorBody);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "Request failed: {:?}", self);
        }

        let details = self.details();
        let body = ErrorBody {
            success: false,
            message: self.to_string(),
            code: self.code(),
            details: None,
        };

        let mut response = (status, Json(&body)).into_response();
        if let Some(details) = details {
            response.extensions_mut().insert(ErrorDetails(ErrorBody {
                details: Some(details),
                ..body
            }));
        }
        response
    }
}

/// Development-only layer: re-renders 5xx error bodies with their diagnostic
/// detail attached.
pub async fn expose_error_details(req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    match response.extensions().get::<ErrorDetails>().cloned() {
        Some(ErrorDetails(body)) => (response.status(), Json(body)).into_response(),
        None => response,
    }
}
