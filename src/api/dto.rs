//! REST API request/response data transfer objects

use serde::Serialize;
use std::collections::HashMap;

use crate::service::SearchHit;

/// Search response
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub count: usize,
    pub results: Vec<SearchHit>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub indexed_faces: usize,
    pub models_loaded: HashMap<String, bool>,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}
