//! Sage daemon entry point.

use anyhow::Result;
use sage_common::SageConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("saged v{} starting", env!("CARGO_PKG_VERSION"));

    let config = SageConfig::load();
    saged::server::run(&config).await
}
