//! Typed failures for the decode, ingestion, index and search paths
//!
//! Storage, configuration and model loading keep using `anyhow`; the enums
//! here are the failures a caller is expected to branch on.

use thiserror::Error;

/// Image bytes could not be turned into a pixel buffer
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("error while loading the image (via the `image` crate): {0}")]
    Image(#[from] image::ImageError),
    #[cfg(feature = "heif")]
    #[error("error with libheif: {0}")]
    LibHeif(#[from] libheif_rs::HeifError),
    #[error("error while converting from raw: {0}")]
    Raw(String),
    #[error("the image provided is unsupported")]
    Unsupported,
    #[error("unsupported file extension: {0:?}")]
    UnsupportedExtension(String),
    #[error("the image has an invalid length to be RGB")]
    InvalidLength,
}

/// Remote listing or download did not succeed
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("drive authentication failed: {0}")]
    Auth(#[from] gcp_auth::Error),
    #[error("unexpected status {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
}

/// The face extractor faulted on a decoded image
#[derive(Error, Debug)]
#[error("face extraction failed: {0}")]
pub struct ExtractionError(#[from] pub anyhow::Error);

/// Building the in-memory embedding index failed
#[derive(Error, Debug, PartialEq)]
pub enum IndexError {
    #[error("no face embeddings in the store")]
    EmptyStore,
    #[error("embedding at row {row} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("embedding at row {row} has zero norm")]
    ZeroEmbedding { row: usize },
    #[error("query has {found} dimensions, index has {expected}")]
    QueryDimension { expected: usize, found: usize },
}

/// A search request could not be answered
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Unsupported or corrupted image")]
    Decode(#[source] DecodeError),
    #[error("query face embedding has zero norm")]
    ZeroEmbedding,
    #[error("query embedding has {found} dimensions, index has {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("search task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
