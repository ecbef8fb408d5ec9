//! Switch handlers: mode transitions, release, the legacy model-only
//! endpoint and the stop-everything hatch.
//!
//! A pipeline that ran to completion always answers 200 with the terminal
//! status inside the body (success, failed or rolled_back) merged with a
//! fresh composite status; callers must inspect `status`. Asynchronous
//! acceptance answers 202.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use gpumux_core::{StatusPayload, SwitchOutcome, SwitchReport, SwitchRequest};

use crate::error::HttpError;
use crate::rate_limit::client_key;
use crate::state::AppState;

/// Terminal pipeline result merged with the composite status view.
#[derive(Serialize)]
pub struct CompletedPayload {
    #[serde(flatten)]
    report: SwitchReport,
    #[serde(flatten)]
    status: StatusPayload,
}

async fn completed(state: &AppState, report: SwitchReport) -> CompletedPayload {
    CompletedPayload {
        report,
        status: state.engine.status().await,
    }
}

async fn respond(state: &AppState, outcome: SwitchOutcome) -> Response {
    match outcome {
        SwitchOutcome::Completed(report) => {
            (StatusCode::OK, Json(completed(state, report).await)).into_response()
        }
        SwitchOutcome::Accepted(accepted) => {
            (StatusCode::ACCEPTED, Json(accepted)).into_response()
        }
    }
}

/// `POST /mode/switch`
pub async fn mode_switch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SwitchRequest>,
) -> Result<Response, HttpError> {
    state.rate_limiter.check(&client_key(&headers))?;
    let outcome = state.engine.switch(req).await?;
    Ok(respond(&state, outcome).await)
}

/// `POST /mode/release` — forced synchronous return to the default LLM.
pub async fn mode_release(
    State(state): State<AppState>,
) -> Result<Json<CompletedPayload>, HttpError> {
    let report = state.engine.release().await?;
    Ok(Json(completed(&state, report).await))
}

/// Body of the legacy LLM-only `POST /switch`.
#[derive(Debug, Deserialize)]
pub struct LegacySwitchRequest {
    pub model: String,
    #[serde(default)]
    pub wait_for_ready: bool,
}

/// `POST /switch`
pub async fn legacy_switch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LegacySwitchRequest>,
) -> Result<Response, HttpError> {
    state.rate_limiter.check(&client_key(&headers))?;
    let outcome = state
        .engine
        .switch(SwitchRequest::llm(req.model, req.wait_for_ready))
        .await?;
    Ok(respond(&state, outcome).await)
}

/// `POST /stop` — stop every backend and ComfyUI, settle on llm.
pub async fn stop(State(state): State<AppState>) -> Result<Json<StatusPayload>, HttpError> {
    state.engine.stop_all().await?;
    Ok(Json(state.engine.status().await))
}
