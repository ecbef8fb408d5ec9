//! Bearer-token authentication middleware.
//!
//! Missing header → 401, wrong token → 403, token unconfigured on the
//! server → 500. The comparison is constant-time.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::error::HttpError;
use crate::state::AppState;

pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let expected = state.admin_token.as_str();
    if expected.is_empty() {
        return Err(HttpError::Internal(
            "ADMIN_TOKEN is not configured".to_string(),
        ));
    }

    let supplied = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| HttpError::Unauthorized("missing bearer token".to_string()))?;

    if !bool::from(supplied.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(HttpError::Forbidden("invalid token".to_string()));
    }

    Ok(next.run(request).await)
}
