//! Batch ingestion from a remote drive into the face store

pub mod drive;
pub mod pipeline;
pub mod writer;

pub use drive::{DriveClient, DriveImageRef, FilePage, GoogleDriveClient};
pub use pipeline::{is_image, list_images, process_file, run_ingestion, IngestStats};
pub use writer::BatchWriter;
