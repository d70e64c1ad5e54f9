//! Drive face search service
//!
//! Loads every stored embedding into memory once, then serves photo
//! uploads over REST and answers with the matching drive files.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use drivefaces::api::{create_rest_router, AppState};
use drivefaces::config::Config;
use drivefaces::engine::{ModelPool, OpenVinoExtractor};
use drivefaces::service::{EmbeddingIndex, SearchService};
use drivefaces::storage::{FaceStore, SqliteStorage};

#[derive(Debug, Parser)]
#[command(version, about = "Serve face search over indexed drive photos")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = Config::default_path())]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Starting drivefaces v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_or_default(&args.config)?;

    info!("Configuration loaded:");
    info!("  Port: {}", config.server.port);
    info!("  Device: {}", config.inference.device);
    info!("  Model idle timeout: {}s", config.inference.model_idle_timeout);
    info!("  Min score: {}", config.search.min_score);

    // Load the index
    let storage_path = config.storage.sqlite_path.to_string_lossy().into_owned();
    let storage = SqliteStorage::new(&storage_path).await?;
    let records = storage.load_all().await?;
    let index = EmbeddingIndex::build(&records)
        .with_context(|| format!("Cannot build search index from {}", storage_path))?;
    info!("Loaded {} faces ({} dims) from {}", index.len(), index.dim(), storage_path);
    drop(records);

    // Initialize model pool
    let pool = Arc::new(ModelPool::new(&config.inference, &config.models)?);
    tokio::spawn(pool.clone().start_cleanup_task());

    let extractor = Arc::new(OpenVinoExtractor::new(pool.clone(), &config.models));
    let service = Arc::new(
        SearchService::new(Arc::new(index), extractor, config.search.clone())
            .with_model_pool(pool.clone()),
    );

    let state = Arc::new(AppState::new(service, config.server.static_dir.clone()));
    let router = create_rest_router(state);

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("REST API listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, cleaning up...");
        })
        .await?;

    pool.shutdown();

    info!("Goodbye!");
    Ok(())
}
