//! Server bootstrap - the composition root.
//!
//! This is the only place where production adapters are wired to the
//! engine. Tests build their own `AxumContext` over fake ports.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use gpumux_core::{Config, ContainerOrchestrator, GatewayProbe, SwitchEngine};
use gpumux_runtime::{DockerOrchestrator, LiteLlmProbe};

use crate::rate_limit::RateLimiter;

/// Application context for the HTTP adapter.
pub struct AxumContext {
    /// The switch engine, shared with the lease monitor.
    pub engine: Arc<SwitchEngine>,
    /// Expected bearer token; empty means unconfigured.
    pub admin_token: String,
    /// Per-caller switch rate limiter.
    pub rate_limiter: RateLimiter,
}

impl AxumContext {
    /// Assemble a context from pre-built ports. Used directly by tests.
    #[must_use]
    pub fn new(
        config: Config,
        orchestrator: Arc<dyn ContainerOrchestrator>,
        gateway: Arc<dyn GatewayProbe>,
    ) -> Self {
        let admin_token = config.admin_token.clone();
        let rate_limiter = RateLimiter::per_minute(config.rate_limit_per_minute);
        let engine = SwitchEngine::new(config, orchestrator, gateway);
        Self {
            engine,
            admin_token,
            rate_limiter,
        }
    }
}

/// Wire the production adapters to the engine.
#[must_use]
pub fn build_context(config: Config) -> AxumContext {
    let orchestrator: Arc<dyn ContainerOrchestrator> = Arc::new(DockerOrchestrator::new(
        &config.docker_proxy_url,
        config.docker_timeout,
    ));
    // The inventory request uses the same per-call timeout as docker calls.
    let gateway: Arc<dyn GatewayProbe> = Arc::new(LiteLlmProbe::new(
        &config.litellm_models_url,
        &config.litellm_key,
        config.litellm_poll_interval,
        config.docker_timeout,
    ));
    AxumContext::new(config, orchestrator, gateway)
}

/// Start the HTTP server and the lease monitor; block until shutdown.
pub async fn start_server(config: Config, bind_addr: &str) -> Result<()> {
    let ctx = build_context(config);
    let engine = ctx.engine.clone();
    engine.start_lease_monitor();

    let app = crate::routes::create_router(ctx);
    let listener = TcpListener::bind(bind_addr).await?;
    info!("gpumux listening on http://{bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Tear the monitor down before the runtime goes away.
    engine.shutdown().await;
    Ok(())
}
