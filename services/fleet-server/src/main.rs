use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use osfleet_core::{logging, AppConfig};
use osfleet_server::{reaper, router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    logging::init_from_config(&config.logging);

    let state = Arc::new(AppState::new(config.clone()).await?);

    let shutdown = CancellationToken::new();
    let reaper = reaper::spawn(
        state.manager.clone(),
        config.campaign.expiry_sweep(),
        shutdown.clone(),
    );

    let app = router(state);

    let listener = TcpListener::bind(&config.server.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_address))?;
    info!(address = %config.server.listen_address, "osfleet server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    reaper.await.ok();
    info!("osfleet server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if result.is_ok() {
                info!("Shutdown signal received");
            }
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
