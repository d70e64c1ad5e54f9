//! Face extraction engine
//!
//! OpenVINO-based SCRFD detection and ArcFace embedding with:
//! - Lazy model loading and idle unloading
//! - Landmark alignment before embedding
//! - A [`FaceExtractor`] seam so tests can substitute a fake

pub mod pool;
pub mod detector;
pub mod embedder;
pub mod extractor;
pub mod preprocess;

pub use pool::ModelPool;
pub use detector::{FaceBox, FaceDetector};
pub use embedder::FaceEmbedder;
pub use extractor::{DetectedFace, FaceExtractor, OpenVinoExtractor};
