//! Drive face search library
//!
//! Indexes faces found in cloud drive folders into SQLite and serves
//! similarity search over the stored embeddings.
//!
//! Cargo features:
//! - `raw` (default): decode `.arw` camera files during ingestion.
//! - `heif`: HEIC/HEIF fallback decoding, for iPhone photos. Needs a system
//!   libheif. Without it such uploads are rejected as undecodable (422).

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod service;
pub mod storage;
pub mod utils;

pub use config::Config;
