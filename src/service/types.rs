//! Service layer types

use serde::{Deserialize, Serialize};

/// Drive preview link for a file
pub fn preview_url(file_id: &str) -> String {
    format!("https://drive.google.com/uc?id={}", file_id)
}

/// Drive direct-download link for a file
pub fn download_url(file_id: &str) -> String {
    format!("https://drive.google.com/uc?id={}&export=download", file_id)
}

/// One matching indexed face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_id: String,
    pub file_name: String,
    pub preview_url: String,
    pub download_url: String,
    pub score: f32,
}

/// Ranked matches for one query image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub count: usize,
    pub results: Vec<SearchHit>,
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub healthy: bool,
    pub version: String,
    pub indexed_faces: usize,
    pub models_loaded: std::collections::HashMap<String, bool>,
}
