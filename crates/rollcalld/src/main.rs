use anyhow::{Context, Result};
use rollcall_core::{
    CommandExtractor, EmbeddingStore, FaceExtractor, ThresholdConfig, UnknownFaceArchiver,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::load()?;
    tracing::info!(
        embeddings_dir = %config.embeddings_dir.display(),
        unknown_faces_dir = %config.unknown_faces_dir.display(),
        threshold = config.confidence_threshold,
        extractor = %config.extractor_cmd,
        "configuration loaded"
    );

    let mut store = EmbeddingStore::open(&config.embeddings_dir)?;
    if let Some(dim) = config.embedding_dim {
        store = store.with_dimension(dim);
    }
    let store = Arc::new(store);

    let archiver = UnknownFaceArchiver::new(
        &config.unknown_faces_dir,
        &config.unknown_faces_url_prefix,
        store.clone(),
    )?;
    let threshold = Arc::new(ThresholdConfig::new(config.confidence_threshold)?);
    let extractor: Box<dyn FaceExtractor> = Box::new(CommandExtractor::new(
        config.extractor_cmd.clone(),
        config.extractor_args.clone(),
    ));

    let engine = engine::EngineHandle::new(engine::Engine::new(
        extractor, store, archiver, threshold,
    ));
    let app = api::router(api::AppState::new(engine));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(%addr, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
