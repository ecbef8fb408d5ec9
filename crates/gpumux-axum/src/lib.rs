//! Axum HTTP adapter for the gpumux switch engine.
//!
//! Bearer-authenticated operator API over the engine: catalogue, status,
//! mode/model switching, release and the stop-everything hatch, plus the
//! two unauthenticated probes.

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use bootstrap::{AxumContext, build_context, start_server};
pub use routes::create_router;
