//! Liveness and readiness handlers. Both are unauthenticated probes.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use gpumux_core::ReadyPayload;

use crate::error::HttpError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthPayload {
    status: &'static str,
}

/// `GET /health`
pub async fn health() -> Json<HealthPayload> {
    Json(HealthPayload { status: "ok" })
}

/// `GET /healthz/ready`
///
/// 503 unless the host is serving exactly the selected LLM.
pub async fn ready(State(state): State<AppState>) -> Result<Json<ReadyPayload>, HttpError> {
    state
        .engine
        .ready()
        .await
        .map(Json)
        .map_err(HttpError::ServiceUnavailable)
}
