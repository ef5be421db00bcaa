use anyhow::{Context, Result};
use roadwar_core::logging;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use roadwar_territory_api::{config::Config, router, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init_with(config.log_format);

    let state = Arc::new(AppState::new(&config)?);
    let sweeper = state.sweeper.clone().start();
    let shutdown = state.shutdown.clone();

    let app = router(state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    info!(
        addr = %bind_addr,
        sweep_interval_secs = config.sweep_interval_secs,
        request_timeout_ms = config.request_timeout_ms,
        "Territory API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    shutdown.notify_one();
    sweeper.await.context("deadline sweeper task panicked")?;
    Ok(())
}
