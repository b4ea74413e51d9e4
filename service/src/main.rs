//! FxQuote Service Binary
//!
//! Runs scheduled rate ingestion against Postgres until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fxquote_fx::HttpRateProvider;
use fxquote_service::{FxQuoteService, ServiceConfig};
use fxquote_store::{MemoryCache, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting FxQuote");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store = PgStore::connect(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;

    let provider = HttpRateProvider::new(config.provider.url.clone(), config.provider.timeout)
        .context("Failed to build rate provider")?;

    let service = Arc::new(FxQuoteService::new(
        config.clone(),
        Arc::new(store),
        Arc::new(MemoryCache::new()),
        Arc::new(provider),
    )?);

    // Set up graceful shutdown
    let service_clone = service.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Shutdown signal received");
        if let Err(e) = service_clone.stop().await {
            error!(error = %e, "Error during shutdown");
        }
    });

    service.start().await?;

    info!(
        base_currency = %config.base_currency,
        provider_url = %config.provider.url,
        ingest_interval_secs = config.ingest_interval.as_secs(),
        "FxQuote running"
    );

    // Keep running until shutdown
    while !service.state().is_terminal() {
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    }

    info!("FxQuote shutdown complete");
    Ok(())
}
