//! Application state for the Planet Sentinel server
//!
//! Holds the model handle loaded once at startup. Inference requests are
//! serialized through a single async mutex, so waiting requests queue in
//! arrival order instead of running concurrently on the backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{error, info};

use planet_sentinel::backend::{default_device, DefaultBackend};
use planet_sentinel::inference::ModelHandle;
use planet_sentinel::PipelineConfig;

pub type SharedModel = Arc<Mutex<ModelHandle<DefaultBackend>>>;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Checkpoint sidecar to serve (`best.json` / `last.json`)
    pub checkpoint: PathBuf,
    /// Pipeline configuration file; defaults are used when absent
    pub pipeline_config: Option<PathBuf>,
    /// Directory for full-resolution change maps
    pub output_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::from("checkpoints/best.json"),
            pipeline_config: None,
            output_dir: PathBuf::from("output/maps"),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    /// `None` when the checkpoint could not be loaded at startup
    pub model: Option<SharedModel>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, model: Option<ModelHandle<DefaultBackend>>) -> Self {
        Self {
            config,
            model: model.map(|m| Arc::new(Mutex::new(m))),
            started_at: Instant::now(),
        }
    }

    /// Load the configured checkpoint. A failure is logged and leaves the
    /// server running without a model.
    pub fn load(config: ServerConfig) -> anyhow::Result<Self> {
        let pipeline = match &config.pipeline_config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };

        let model = match ModelHandle::<DefaultBackend>::load(&config.checkpoint, &pipeline, default_device()) {
            Ok(handle) => {
                info!("Model loaded from {:?}", config.checkpoint);
                Some(handle)
            }
            Err(e) => {
                error!("Failed to load model: {}", e);
                None
            }
        };

        Ok(Self::new(config, model))
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
