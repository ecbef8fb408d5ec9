//! Status handlers: the full composite payload and the mode subset.

use axum::Json;
use axum::extract::State;

use gpumux_core::{ModePayload, StatusPayload};

use crate::state::AppState;

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Json<StatusPayload> {
    Json(state.engine.status().await)
}

/// `GET /mode`
pub async fn mode(State(state): State<AppState>) -> Json<ModePayload> {
    Json(state.engine.mode_status().await)
}
