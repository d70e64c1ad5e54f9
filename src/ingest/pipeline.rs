//! Ingestion run: list drive folders, extract faces, append to the store
//!
//! Files are processed by a fixed pool of worker tasks pulling from a bounded
//! job queue. Each worker downloads, decodes and extracts one file at a time
//! and hands its records to the single [`BatchWriter`]. A file that fails at
//! any step yields no records and the run moves on.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::drive::{DriveClient, DriveImageRef};
use super::writer::BatchWriter;
use crate::config::IngestConfig;
use crate::engine::FaceExtractor;
use crate::error::{DecodeError, TransportError};
use crate::storage::{FaceRecord, FaceStore};
use crate::utils::image::decode_for_ingest;
use crate::utils::math::l2_norm;

/// RAW extensions accepted by the listing even without an `image/*` mime type
pub const RAW_EXTENSIONS: [&str; 3] = [".arw", ".cr2", ".nef"];

const PROGRESS_EVERY: usize = 50;

/// Counters for one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub files_listed: usize,
    pub files_processed: usize,
    pub files_without_faces: usize,
    pub faces_inserted: u64,
    pub flushes: usize,
}

/// Whether a listed file should be ingested
pub fn is_image(file: &DriveImageRef) -> bool {
    let name = file.name.to_lowercase();
    file.mime_type.starts_with("image/") || RAW_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Every image directly inside `folder_id`, across all listing pages
pub async fn list_images<C: DriveClient + ?Sized>(
    client: &C,
    folder_id: &str,
) -> Result<Vec<DriveImageRef>, TransportError> {
    let mut images = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = client.list_page(folder_id, page_token.as_deref()).await?;

        for file in page.files {
            if is_image(&file) {
                images.push(file);
            } else {
                debug!("Skipping non-image file: {} ({})", file.name, file.mime_type);
            }
        }

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    info!("Folder {}: {} images found", folder_id, images.len());
    Ok(images)
}

/// Download, decode and extract one file; any failure yields no records
pub async fn process_file<C, E>(
    client: &C,
    extractor: Arc<E>,
    file: &DriveImageRef,
    max_side: u32,
) -> Vec<FaceRecord>
where
    C: DriveClient + ?Sized,
    E: FaceExtractor,
{
    let bytes = match client.download(&file.id).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Download failed for {}: {}", file.name, e);
            return Vec::new();
        }
    };

    let name = file.name.clone();
    let extracted = tokio::task::spawn_blocking(move || -> Result<_> {
        let image = decode_for_ingest(&name, &bytes, max_side)?;
        Ok(extractor.extract(&image)?)
    })
    .await;

    let faces = match extracted {
        Ok(Ok(faces)) => faces,
        Ok(Err(e)) => {
            match e.downcast_ref::<DecodeError>() {
                Some(DecodeError::UnsupportedExtension(_)) => {
                    debug!("Skipping unsupported file: {}", file.name)
                }
                _ => warn!("Error processing {}: {:#}", file.name, e),
            }
            return Vec::new();
        }
        Err(e) => {
            warn!("Worker task failed on {}: {}", file.name, e);
            return Vec::new();
        }
    };

    let folder_id = file.first_parent();
    faces
        .into_iter()
        .filter(|face| {
            let usable = l2_norm(&face.embedding) > 0.0;
            if !usable {
                warn!("Dropping zero-norm embedding from {}", file.name);
            }
            usable
        })
        .map(|face| FaceRecord::new(&file.id, &file.name, folder_id, face.embedding))
        .collect()
}

/// Index every image under `folder_ids` into `store`
pub async fn run_ingestion<C, E>(
    client: Arc<C>,
    extractor: Arc<E>,
    store: Arc<dyn FaceStore>,
    folder_ids: &[String],
    config: &IngestConfig,
) -> Result<IngestStats>
where
    C: DriveClient,
    E: FaceExtractor,
{
    let start = Instant::now();

    let mut images = Vec::new();
    for folder_id in folder_ids {
        let found = list_images(client.as_ref(), folder_id)
            .await
            .with_context(|| format!("Failed to list folder {}", folder_id))?;
        images.extend(found);
    }
    info!("Total images: {}", images.len());

    let mut stats = IngestStats {
        files_listed: images.len(),
        ..IngestStats::default()
    };

    let workers = config.max_workers.max(1);
    let (job_tx, job_rx) = async_channel::bounded::<DriveImageRef>(workers * 2);
    let (result_tx, mut result_rx) = mpsc::channel::<(String, Vec<FaceRecord>)>(workers * 2);

    let feeder = tokio::spawn(async move {
        for image in images {
            if job_tx.send(image).await.is_err() {
                break;
            }
        }
    });

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let client = client.clone();
        let extractor = extractor.clone();
        let max_side = config.max_side;

        handles.push(tokio::spawn(async move {
            while let Ok(file) = job_rx.recv().await {
                let records = process_file(client.as_ref(), extractor.clone(), &file, max_side).await;
                if result_tx.send((file.name, records)).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(job_rx);
    drop(result_tx);

    let mut writer = BatchWriter::new(store, config.batch_size);
    while let Some((file_name, records)) = result_rx.recv().await {
        stats.files_processed += 1;
        if records.is_empty() {
            stats.files_without_faces += 1;
        }
        debug!("{}: {} faces", file_name, records.len());

        writer.push(records).await?;

        if stats.files_processed % PROGRESS_EVERY == 0 {
            info!("Processed {}/{} images", stats.files_processed, stats.files_listed);
        }
    }

    let (flushes, inserted) = writer.finish().await?;
    stats.flushes = flushes;
    stats.faces_inserted = inserted;

    feeder.await?;
    for handle in handles {
        handle.await?;
    }

    info!("Indexing completed!");
    info!(
        "{} faces from {} images ({} without faces) in {:?}",
        stats.faces_inserted,
        stats.files_processed,
        stats.files_without_faces,
        start.elapsed()
    );

    Ok(stats)
}
