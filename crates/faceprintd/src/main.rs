use anyhow::{Context, Result};
use faceprint_core::{EuclideanMatcher, OnnxFaceEncoder};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod engine;
mod error;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("faceprintd starting");

    let config = config::Config::load()?;
    tracing::info!(
        bind = %config.bind_addr,
        storage = %config.storage_dir.display(),
        models = %config.model_dir.display(),
        threshold = config.threshold,
        "configuration loaded"
    );

    let encoder = OnnxFaceEncoder::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let engine = engine::spawn_engine(Box::new(encoder))?;

    let store = store::FaceStore::open(&config.storage_dir).await?;
    let state = api::AppState {
        store: Arc::new(store),
        engine,
        matcher: Arc::new(EuclideanMatcher),
        threshold: config.threshold,
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "faceprintd ready");

    axum::serve(listener, api::router(state, config.max_body_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("faceprintd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
