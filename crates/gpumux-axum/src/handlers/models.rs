//! Static model catalogue handler.

use axum::Json;
use serde::Serialize;

use gpumux_core::{ModelSpec, catalog};

#[derive(Serialize)]
pub struct ModelsPayload {
    models: &'static [ModelSpec],
}

/// `GET /models`
pub async fn list() -> Json<ModelsPayload> {
    Json(ModelsPayload {
        models: catalog::models(),
    })
}
