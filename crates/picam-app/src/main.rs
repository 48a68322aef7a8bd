use anyhow::{Context, Result};
use picam_core::PreviewConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app;
mod session;

#[tokio::main]
async fn main() -> Result<()> {
    // GST_DEBUG=3 alongside RUST_LOG=debug shows why a pipeline refused to start
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let config = PreviewConfig::load().context("Loading preview configuration")?;
    info!("picam-preview v{}: {}", env!("CARGO_PKG_VERSION"), app::describe(&config));

    if let Err(e) = app::run(config).await {
        error!("Preview could not start: {:#}", e);
        return Err(e);
    }
    Ok(())
}
