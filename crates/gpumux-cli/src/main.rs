//! gpumux server binary: load the environment, wire the adapters, serve.

use anyhow::Result;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use gpumux_core::Config;

#[derive(Debug, Parser)]
#[command(name = "gpumux", version, about = "GPU mode-and-model switcher")]
struct Cli {
    /// Address to bind the HTTP API on.
    #[arg(long, env = "GPUMUX_BIND", default_value = "0.0.0.0:9000")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    if config.admin_token.is_empty() {
        warn!("ADMIN_TOKEN is not set; every authenticated endpoint will answer 500");
    }

    gpumux_axum::start_server(config, &cli.bind).await
}
