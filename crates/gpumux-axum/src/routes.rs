//! Route definitions and router construction.

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::auth;
use crate::bootstrap::AxumContext;
use crate::handlers;
use crate::state::AppState;

/// Create the main router. Everything except the two probes sits behind
/// the bearer-token middleware.
pub fn create_router(ctx: AxumContext) -> Router {
    let state: AppState = Arc::new(ctx);

    let public = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/healthz/ready", get(handlers::health::ready));

    let authed = Router::new()
        .route("/models", get(handlers::models::list))
        .route("/status", get(handlers::status::status))
        .route("/mode", get(handlers::status::mode))
        .route("/mode/switch", post(handlers::switch::mode_switch))
        .route("/mode/release", post(handlers::switch::mode_release))
        .route("/switch", post(handlers::switch::legacy_switch))
        .route("/stop", post(handlers::switch::stop))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(public)
        .merge(authed)
        .layer(cors)
        .with_state(state)
}
