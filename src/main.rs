use anyhow::Result;
use std::sync::Arc;

use dataset_services::{
    config::Config, logging, routes, services::cleanup::CleanupSweep, AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    logging::init_logging()?;

    // Load configuration
    let config = Config::from_env()?;
    let addr = config.bind_addr;
    let storage = config.storage.clone();

    // Build our application state
    let state = Arc::new(AppState::new(config)?);

    let sweep = CleanupSweep::new(state.store.clone(), state.registry.clone(), storage.ttl)
        .spawn(storage.sweep_interval);

    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep.abort();
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
