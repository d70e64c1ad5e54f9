//! Service and ingestion configuration
//!
//! Both binaries read the same file, so the detector settings used to build
//! the store always match the ones used to search it.

use anyhow::Context;
use serde::Deserialize;
use tracing::info;
use std::path::PathBuf;

use crate::utils::image::{INGEST_MAX_SIDE, SEARCH_MAX_SIDE};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub models: ModelsConfig,
    pub search: SearchConfig,
    pub ingest: IngestConfig,
    pub drive: DriveConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory holding the upload page and its assets
    pub static_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub device: String,
    /// Seconds a model may sit unused before it is unloaded
    pub model_idle_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub detector: PathBuf,
    pub embedder: PathBuf,
    /// Square detector input side; shared by search and ingestion
    pub detector_input_size: u32,
    pub detection_confidence: f32,
    pub embedding_dim: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum cosine score for a match (inclusive)
    pub min_score: f32,
    pub max_side: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub folder_ids: Vec<String>,
    pub batch_size: usize,
    pub max_workers: usize,
    pub max_side: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub api_base: String,
    pub download_base: String,
    /// Static bearer token; takes precedence over `service_account_file`
    pub access_token: Option<String>,
    /// Service account key used to mint read-only Drive tokens
    pub service_account_file: Option<PathBuf>,
    pub page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub sqlite_path: PathBuf,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Invalid config file {}", path))?;
        Ok(config)
    }

    /// Load `path`, or the defaults when no such file exists
    ///
    /// Unreadable or malformed files are errors; only a missing file falls back.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        match std::fs::metadata(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config file at {}, using defaults", path);
                Ok(Self::default())
            }
            _ => Self::load(path),
        }
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            static_dir: PathBuf::from("static"),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
            model_idle_timeout: 300,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("models/det_10g.onnx"),
            embedder: PathBuf::from("models/w600k_r50.onnx"),
            detector_input_size: 640,
            detection_confidence: 0.5,
            embedding_dim: 512,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_score: 0.65,
            max_side: SEARCH_MAX_SIDE,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            folder_ids: Vec::new(),
            batch_size: 100,
            max_workers: 4,
            max_side: INGEST_MAX_SIDE,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            download_base: "https://drive.google.com/uc".to_string(),
            access_token: None,
            service_account_file: None,
            page_size: 1000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("faces.db"),
        }
    }
}
