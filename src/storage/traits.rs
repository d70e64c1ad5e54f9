//! Storage abstraction traits
//!
//! Defines the interface for face embedding persistence. The ingestion run
//! only appends; the search service only reads everything once at startup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use anyhow::Result;

/// A stored face: one detected face in one drive file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    /// Row id assigned by the store; `None` until inserted
    pub id: Option<i64>,
    /// Drive file id the face was found in
    pub file_id: String,
    /// Drive file name
    pub file_name: String,
    /// First parent folder of the file, empty if the listing had none
    pub folder_id: String,
    /// Face embedding as produced by the extractor (not normalized)
    pub embedding: Vec<f32>,
}

impl FaceRecord {
    /// Create a record that has not been persisted yet
    pub fn new(
        file_id: impl Into<String>,
        file_name: impl Into<String>,
        folder_id: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: None,
            file_id: file_id.into(),
            file_name: file_name.into(),
            folder_id: folder_id.into(),
            embedding,
        }
    }
}

/// Face embedding store
/// Implementations must be thread-safe and async-compatible
#[async_trait]
pub trait FaceStore: Send + Sync + 'static {
    /// Insert all records in a single transaction, returning the number inserted
    async fn insert_batch(&self, records: &[FaceRecord]) -> Result<u64>;

    /// Load every record in row id order
    async fn load_all(&self) -> Result<Vec<FaceRecord>>;

    /// Get total face count
    async fn count_faces(&self) -> Result<i64>;
}
