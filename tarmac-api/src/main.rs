use std::net::SocketAddr;

use anyhow::Context;
use tarmac_api::{app, worker, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SWEEP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tarmac_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = tarmac_store::Config::load().context("Failed to load config")?;
    tracing::info!("Starting Tarmac API on port {}", config.server.port);

    let state = AppState::from_config(&config).await?;

    tokio::spawn(worker::start_sweep_worker(
        state.governor.clone(),
        state.inventory.clone(),
        tokio::time::Duration::from_secs(SWEEP_INTERVAL_SECS),
    ));

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.context("Failed to bind")?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
