//! Index every photo in the configured drive folders
//!
//! Appends to the store; running it twice over the same folders stores the
//! faces twice.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use drivefaces::config::Config;
use drivefaces::engine::{ModelPool, OpenVinoExtractor};
use drivefaces::ingest::{run_ingestion, GoogleDriveClient};
use drivefaces::storage::{FaceStore, SqliteStorage};

#[derive(Debug, Parser)]
#[command(version, about = "Index faces from drive folders into the face store")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = Config::default_path())]
    config: String,

    /// Folder id to index; replaces `ingest.folder_ids` when given
    #[arg(short, long = "folder")]
    folders: Vec<String>,

    /// Drive OAuth access token; overrides any service account
    #[arg(long, env = "DRIVE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Service account key file; replaces `drive.service_account_file`
    #[arg(long, env = "DRIVE_SERVICE_ACCOUNT_FILE")]
    service_account: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let mut config = Config::load_or_default(&args.config)?;
    if !args.folders.is_empty() {
        config.ingest.folder_ids = args.folders;
    }
    if args.access_token.is_some() {
        config.drive.access_token = args.access_token;
    }
    if args.service_account.is_some() {
        config.drive.service_account_file = args.service_account;
    }
    if config.ingest.folder_ids.is_empty() {
        bail!("No folders to index; pass --folder or set ingest.folder_ids");
    }

    info!("Indexing {} folder(s)", config.ingest.folder_ids.len());
    info!("  Workers: {}", config.ingest.max_workers);
    info!("  Batch size: {}", config.ingest.batch_size);

    let storage_path = config.storage.sqlite_path.to_string_lossy().into_owned();
    let storage = Arc::new(SqliteStorage::new(&storage_path).await?);
    info!("SQLite storage at {} ({} faces)", storage_path, storage.count_faces().await?);

    let pool = Arc::new(ModelPool::new(&config.inference, &config.models)?);
    let extractor = Arc::new(OpenVinoExtractor::new(pool.clone(), &config.models));
    let client = Arc::new(GoogleDriveClient::new(&config.drive)?);

    let stats = run_ingestion(
        client,
        extractor,
        storage.clone(),
        &config.ingest.folder_ids,
        &config.ingest,
    )
    .await?;

    info!(
        "Stored {} faces in {} batches; store now holds {}",
        stats.faces_inserted,
        stats.flushes,
        storage.count_faces().await?
    );

    pool.shutdown();
    Ok(())
}
