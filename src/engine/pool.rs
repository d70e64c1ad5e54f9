//! Model Pool Manager
//!
//! Compiles the detector and embedder on first use and unloads them after an
//! idle timeout, so a long-running search service does not pin model memory
//! between bursts of requests.

use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use openvino::{CompiledModel, Core};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::{InferenceConfig, ModelsConfig};

/// OpenVINO Core is internally synchronized but the bindings do not mark it Send + Sync
pub struct SafeCore(Core);
unsafe impl Send for SafeCore {}
unsafe impl Sync for SafeCore {}

/// Shared handle to a compiled model
#[derive(Clone)]
pub struct SafeCompiledModel(pub Arc<CompiledModel>);
unsafe impl Send for SafeCompiledModel {}
unsafe impl Sync for SafeCompiledModel {}

impl SafeCompiledModel {
    /// Create an inference request
    /// CompiledModel::create_infer_request is thread-safe in the C++ runtime,
    /// the Rust binding only asks for &mut self
    pub fn create_infer_request(&self) -> anyhow::Result<openvino::InferRequest> {
        unsafe {
            let ptr = Arc::as_ptr(&self.0) as *mut CompiledModel;
            (*ptr).create_infer_request().map_err(|e| e.into())
        }
    }
}

impl Deref for SafeCompiledModel {
    type Target = CompiledModel;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

struct CachedModel {
    compiled: SafeCompiledModel,
    last_access: Instant,
}

/// Models the extractor needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    Detector,
    Embedder,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::Detector, ModelType::Embedder];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Detector => "detector",
            ModelType::Embedder => "embedder",
        }
    }
}

/// Lazily compiled detector and embedder with idle unloading
pub struct ModelPool {
    core: RwLock<SafeCore>,
    device: String,
    idle_timeout: Duration,

    detector_path: String,
    embedder_path: String,

    detector: RwLock<Option<CachedModel>>,
    embedder: RwLock<Option<CachedModel>>,

    shutdown: Notify,
}

impl ModelPool {
    pub fn new(inference: &InferenceConfig, models: &ModelsConfig) -> anyhow::Result<Self> {
        let core = Core::new().context("Failed to initialize OpenVINO runtime")?;

        Ok(Self {
            core: RwLock::new(SafeCore(core)),
            device: inference.device.clone(),
            idle_timeout: Duration::from_secs(inference.model_idle_timeout),
            detector_path: models.detector.to_string_lossy().into_owned(),
            embedder_path: models.embedder.to_string_lossy().into_owned(),
            detector: RwLock::new(None),
            embedder: RwLock::new(None),
            shutdown: Notify::new(),
        })
    }

    fn slot(&self, model_type: ModelType) -> (&RwLock<Option<CachedModel>>, &str) {
        match model_type {
            ModelType::Detector => (&self.detector, &self.detector_path),
            ModelType::Embedder => (&self.embedder, &self.embedder_path),
        }
    }

    /// Get or load a model
    pub fn get_model(&self, model_type: ModelType) -> anyhow::Result<SafeCompiledModel> {
        let (cache, path) = self.slot(model_type);

        let mut guard = cache.write();
        if let Some(cached) = guard.as_mut() {
            cached.last_access = Instant::now();
            return Ok(cached.compiled.clone());
        }

        info!("Loading model: {} from {}", model_type.as_str(), path);
        let start = Instant::now();

        let compiled = {
            let mut core = self.core.write();
            let model = core
                .0
                .read_model_from_file(path, "")
                .with_context(|| format!("Failed to read model {}", path))?;
            core.0.compile_model(&model, self.device.as_str().into())?
        };
        let compiled = SafeCompiledModel(Arc::new(compiled));

        info!("Model {} loaded in {:?}", model_type.as_str(), start.elapsed());

        *guard = Some(CachedModel {
            compiled: compiled.clone(),
            last_access: Instant::now(),
        });

        Ok(compiled)
    }

    pub fn is_loaded(&self, model_type: ModelType) -> bool {
        self.slot(model_type).0.read().is_some()
    }

    /// Loaded state of every model
    pub fn get_status(&self) -> Vec<(ModelType, bool)> {
        ModelType::ALL
            .into_iter()
            .map(|t| (t, self.is_loaded(t)))
            .collect()
    }

    fn cleanup_idle_models(&self) {
        let now = Instant::now();

        for model_type in ModelType::ALL {
            let (cache, _) = self.slot(model_type);
            let mut guard = cache.write();
            let idle = guard
                .as_ref()
                .is_some_and(|cached| now.duration_since(cached.last_access) > self.idle_timeout);

            if idle {
                info!("Unloading idle model: {}", model_type.as_str());
                *guard = None;
            }
        }
    }

    /// Periodically unload idle models until [`ModelPool::shutdown`] is called
    pub async fn start_cleanup_task(self: Arc<Self>) {
        let check_interval = Duration::from_secs(60);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(check_interval) => {
                    debug!("Running model cleanup check");
                    self.cleanup_idle_models();
                }
                _ = self.shutdown.notified() => {
                    info!("Model pool cleanup task shutting down");
                    break;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

impl Drop for ModelPool {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}
