//! Face extraction: detection plus embedding behind one trait
//!
//! Both the search service and the ingestion run go through
//! [`FaceExtractor`], so they share one detector configuration and produce
//! comparable embeddings.

use std::sync::Arc;

use image::DynamicImage;

use super::detector::{FaceBox, FaceDetector};
use super::embedder::FaceEmbedder;
use super::pool::ModelPool;
use super::preprocess::align_face;
use crate::config::ModelsConfig;
use crate::error::ExtractionError;

/// One detected face with its embedding
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: FaceBox,
    pub embedding: Vec<f32>,
}

/// Detects faces in a decoded image and embeds each one
///
/// Output order is the extractor's own (highest detection confidence first
/// for the OpenVINO implementation); callers that use "the first face" rely
/// on that order and nothing else. Must be deterministic for a given image.
pub trait FaceExtractor: Send + Sync + 'static {
    fn extract(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ExtractionError>;
}

/// SCRFD detection + ArcFace embedding on OpenVINO
pub struct OpenVinoExtractor {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OpenVinoExtractor {
    pub fn new(pool: Arc<ModelPool>, models: &ModelsConfig) -> Self {
        Self {
            detector: FaceDetector::new(
                pool.clone(),
                models.detection_confidence,
                models.detector_input_size,
            ),
            embedder: FaceEmbedder::new(pool, models.embedding_dim),
        }
    }
}

impl FaceExtractor for OpenVinoExtractor {
    fn extract(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ExtractionError> {
        let boxes = self.detector.detect(image)?;

        boxes
            .into_iter()
            .map(|bbox| -> Result<DetectedFace, ExtractionError> {
                let aligned = align_face(image, &bbox.landmarks);
                let embedding = self.embedder.embed(&aligned)?;
                Ok(DetectedFace { bbox, embedding })
            })
            .collect()
    }
}
