//! Face search over the in-memory embedding index

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::engine::{FaceExtractor, ModelPool};
use crate::error::SearchError;
use crate::utils::image::decode_image;
use crate::utils::math::normalized;

use super::index::EmbeddingIndex;
use super::types::*;

/// Keep scores `>= min_score` and order them best first
///
/// The sort is stable, so equal scores keep their row order.
pub fn rank_scores(scores: Vec<(usize, f32)>, min_score: f32) -> Vec<(usize, f32)> {
    let mut kept: Vec<(usize, f32)> = scores
        .into_iter()
        .filter(|&(_, score)| score >= min_score)
        .collect();
    kept.sort_by(|a, b| b.1.total_cmp(&a.1));
    kept
}

/// Face search service
///
/// Holds the index read-only; any number of searches may run concurrently.
pub struct SearchService<E: FaceExtractor> {
    index: Arc<EmbeddingIndex>,
    extractor: Arc<E>,
    pool: Option<Arc<ModelPool>>,
    config: SearchConfig,
}

impl<E: FaceExtractor> SearchService<E> {
    pub fn new(index: Arc<EmbeddingIndex>, extractor: Arc<E>, config: SearchConfig) -> Self {
        Self {
            index,
            extractor,
            pool: None,
            config,
        }
    }

    /// Report model load state from this pool in [`SearchService::health`]
    pub fn with_model_pool(mut self, pool: Arc<ModelPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Find indexed faces matching the first face in `image_data`
    pub async fn search(&self, image_data: Vec<u8>) -> Result<SearchOutcome, SearchError> {
        let start = Instant::now();

        let max_side = self.config.max_side;
        let extractor = self.extractor.clone();
        let faces = tokio::task::spawn_blocking(move || {
            let image = decode_image(&image_data, max_side).map_err(SearchError::Decode)?;
            extractor.extract(&image).map_err(SearchError::from)
        })
        .await??;

        // First face in extractor order; the query is not ranked by size or confidence
        let Some(face) = faces.into_iter().next() else {
            debug!("No face detected in query image");
            return Ok(SearchOutcome::default());
        };

        let query = normalized(&face.embedding).ok_or(SearchError::ZeroEmbedding)?;
        let scores = self.index.score(&query).map_err(|_| SearchError::DimensionMismatch {
            expected: self.index.dim(),
            found: query.len(),
        })?;

        let results: Vec<SearchHit> = rank_scores(scores, self.config.min_score)
            .into_iter()
            .filter_map(|(row, score)| {
                let meta = self.index.meta(row)?;
                Some(SearchHit {
                    file_id: meta.file_id.clone(),
                    file_name: meta.file_name.clone(),
                    preview_url: preview_url(&meta.file_id),
                    download_url: download_url(&meta.file_id),
                    score,
                })
            })
            .collect();

        info!(
            "Search matched {} of {} faces in {}ms",
            results.len(),
            self.index.len(),
            start.elapsed().as_millis()
        );

        Ok(SearchOutcome {
            count: results.len(),
            results,
        })
    }

    /// Get health status
    pub fn health(&self) -> HealthResult {
        let models_loaded: HashMap<String, bool> = self
            .pool
            .as_ref()
            .map(|pool| {
                pool.get_status()
                    .into_iter()
                    .map(|(t, loaded)| (t.as_str().to_string(), loaded))
                    .collect()
            })
            .unwrap_or_default();

        HealthResult {
            healthy: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            indexed_faces: self.index.len(),
            models_loaded,
        }
    }
}
