//! HTTP error type and mappings from the core error.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use gpumux_core::SwitchError;

/// Axum-facing error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Invalid input.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or malformed bearer token.
    #[error("{0}")]
    Unauthorized(String),

    /// Wrong bearer token.
    #[error("{0}")]
    Forbidden(String),

    /// Another switch holds the lock.
    #[error("{0}")]
    Conflict(String),

    /// A preflight check failed.
    #[error("{0}")]
    PreconditionFailed(String),

    /// Caller exceeded the switch rate limit.
    #[error("{0}")]
    TooManyRequests(String),

    /// The host is not in a servable state (readiness probe).
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl HttpError {
    const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<SwitchError> for HttpError {
    fn from(err: SwitchError) -> Self {
        match err {
            SwitchError::BadRequest(msg) => Self::BadRequest(msg),
            SwitchError::Precondition(msg) => Self::PreconditionFailed(msg),
            SwitchError::Conflict => Self::Conflict("switch_in_progress".to_string()),
            SwitchError::Transport(msg)
            | SwitchError::Timeout(msg)
            | SwitchError::Unhealthy(msg)
            | SwitchError::Internal(msg) => Self::Internal(msg),
        }
    }
}
