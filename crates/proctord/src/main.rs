use anyhow::{Context, Result};
use proctor_core::{Gallery, Pipeline};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        model_dir = %config.model_dir.display(),
        "proctord starting"
    );

    let gallery = Arc::new(Gallery::load_or_unavailable(
        &config.embeddings_path,
        &config.labels_path,
    ));

    let pipeline = Pipeline::load(&config.model_dir, config.evaluator(Arc::clone(&gallery)))
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    let engine = engine::spawn_engine(pipeline)?;

    let app = api::router(api::AppState { engine, gallery }, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "proctord ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("proctord shutting down");
    Ok(())
}
