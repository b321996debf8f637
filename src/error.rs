//! Error handling for the admission layer.
//!
//! Every rejection the pipeline can produce is represented here and is
//! recovered into a well-formed HTTP response at the pipeline boundary;
//! nothing propagates to application handlers as an unhandled fault.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

/// A specialized Result type for gatehouse operations.
pub type Result<T> = std::result::Result<T, GatehouseError>;

/// Machine-readable error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimited,
    CsrfRejected,
    ValidationError,
    ConfigurationError,
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::CsrfRejected => StatusCode::FORBIDDEN,
            Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ConfigurationError | Self::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "RATE_LIMITED",
            Self::CsrfRejected => "CSRF_REJECTED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Errors raised by the admission pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum GatehouseError {
    /// The client exhausted its window for the resolved endpoint class.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited {
        limit: u32,
        remaining: u32,
        reset_at: DateTime<Utc>,
        retry_after_secs: u64,
    },

    /// The double-submit check failed. Deliberately carries no detail:
    /// a missing cookie, a missing header and a forged token must be
    /// indistinguishable at the response level.
    #[error("invalid csrf token")]
    CsrfRejected,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatehouseError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::CsrfRejected => ErrorCode::CsrfRejected,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Configuration(_) => ErrorCode::ConfigurationError,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        self.code().http_status()
    }

    /// Message safe to expose to clients.
    fn user_message(&self) -> String {
        match self {
            Self::RateLimited { .. } => "Too many requests. Please slow down.".to_string(),
            Self::CsrfRejected => "Invalid CSRF token".to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::Configuration(_) | Self::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    fn log(&self) {
        match self {
            Self::RateLimited { .. } | Self::CsrfRejected | Self::Validation(_) => {
                debug!(code = self.code().as_str(), "request rejected: {}", self)
            }
            Self::Configuration(_) => error!(code = self.code().as_str(), "{}", self),
            Self::Internal(_) => warn!(code = self.code().as_str(), "{}", self),
        }
    }
}

/// Error envelope for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    /// User-facing reason string
    pub message: String,

    /// Stable machine-readable code
    pub code: ErrorCode,

    /// Retry hint in seconds, present on 429s
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl From<&GatehouseError> for ErrorResponse {
    fn from(error: &GatehouseError) -> Self {
        let retry_after_secs = match error {
            GatehouseError::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        };
        Self {
            success: false,
            message: error.user_message(),
            code: error.code(),
            retry_after_secs,
        }
    }
}

impl IntoResponse for GatehouseError {
    fn into_response(self) -> Response {
        self.log();
        counter!("gatehouse_rejections_total", "code" => self.code().as_str()).increment(1);

        let status = self.http_status();
        let body = ErrorResponse::from(&self);

        let mut headers = HeaderMap::new();
        if let GatehouseError::RateLimited { limit, remaining, reset_at, retry_after_secs } = &self
        {
            headers.insert("X-RateLimit-Limit", HeaderValue::from(*limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(*remaining));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_at.timestamp()));
            headers.insert("Retry-After", HeaderValue::from(*retry_after_secs));
        }

        (status, headers, Json(body)).into_response()
    }
}
