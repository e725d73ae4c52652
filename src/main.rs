//! rserpool-handlespace registrar entry point.
//!
//! Builds the registrar core and runs the timer maintenance loop until
//! ctrl-c.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use rserpool_handlespace::config::HandlespaceConfig;
use rserpool_handlespace::service::RegistrarCore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HandlespaceConfig::from_env()
        .map_err(|error| anyhow::anyhow!("{error}"))
        .context("loading configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let core = RegistrarCore::new(config);
    tracing::info!(
        registrar = %core.config().registrar_id,
        max_pool_elements = core.config().max_pool_elements,
        "starting registrar"
    );
    tracing::info!(description = %core.description().await, "handlespace ready");

    core.run_maintenance(async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "cannot listen for ctrl-c");
        }
    })
    .await;

    tracing::info!(description = %core.description().await, "registrar stopped");
    Ok(())
}
