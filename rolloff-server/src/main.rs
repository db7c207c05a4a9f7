//! HTTP server for rolloff: scrapes dumpster rental vendors on a schedule and serves the data.

mod config;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use rolloff_core::{
    ConcurrencyPolicy, JsonFileStore, Normalizer, Orchestrator, Pipeline, RetryPolicy,
    RolloffService, Scheduler, SnapshotStore, VendorRegistry,
};
use rolloff_provider_budget as budget;
use rolloff_provider_liberty as liberty;
use rolloff_provider_wm as wm;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rolloff_core=debug")),
        )
        .with(fmt::layer())
        .init();

    // Vendors
    let settings = config.provider_settings();
    let plugins = vec![
        budget::plugin(&settings).context("Failed to load Budget Dumpster defaults")?,
        liberty::plugin(&settings).context("Failed to load Liberty Dumpsters defaults")?,
        wm::plugin(&settings).context("Failed to load Waste Management defaults")?,
    ];
    let registry = Arc::new(VendorRegistry::new(plugins)?);

    // Pipeline + scheduler
    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    tracing::info!(path = %store.path().display(), "using snapshot file");
    let store: Arc<dyn SnapshotStore> = store;

    let orchestrator = Orchestrator::new(
        &registry,
        Normalizer::new(config.price_bounds),
        ConcurrencyPolicy::from_limit(config.concurrency),
        RetryPolicy::new(config.retry_attempts, config.backoff_unit),
    );
    let pipeline = Arc::new(Pipeline::new(orchestrator, Arc::clone(&store)));
    let scheduler = Arc::new(Scheduler::new(pipeline, config.schedule_period));
    scheduler.start()?;

    let service = Arc::new(RolloffService::new(
        store,
        Arc::clone(&scheduler),
        Arc::clone(&registry),
    ));
    let app = routes::router(service, &config.cors_origins);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;
    tracing::info!(addr = %config.bind, vendors = registry.len(), "rolloff server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.stop().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = signal::ctrl_c().await {
        tracing::error!(error = %error, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
