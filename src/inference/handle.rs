//! Loaded-once model handle shared by the CLI and the server

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipelineConfig;
use crate::inference::scorer::{ChangeScorer, ScenePredictionResponse};
use crate::inference::sliding::{ChangeMap, SlidingWindowInferencer};
use crate::model::SiameseChangeNet;
use crate::raster::Raster;
use crate::training::{load_checkpoint, CheckpointMetadata};
use crate::utils::error::Result;

static MAP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Full-resolution prediction: where the change map blob was stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullPredictionResponse {
    pub result_path: PathBuf,
    pub shape: [usize; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    /// Seconds since the serving process started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
}

impl HealthResponse {
    pub fn new(model_loaded: bool) -> Self {
        Self {
            status: "ok".to_string(),
            model_loaded,
            uptime_seconds: None,
        }
    }

    pub fn with_uptime(mut self, seconds: u64) -> Self {
        self.uptime_seconds = Some(seconds);
        self
    }
}

/// A trained model plus the inference settings it is served with.
///
/// The weights are read-only after construction; every prediction borrows
/// the handle immutably.
#[derive(Debug)]
pub struct ModelHandle<B: Backend> {
    model: SiameseChangeNet<B>,
    metadata: Option<CheckpointMetadata>,
    inferencer: SlidingWindowInferencer,
    scorer: ChangeScorer,
    device: B::Device,
}

impl<B: Backend> ModelHandle<B> {
    /// Load weights from a checkpoint sidecar (`best.json` / `last.json`)
    pub fn load(checkpoint: &Path, config: &PipelineConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        let (model, metadata) = load_checkpoint::<B>(checkpoint, &config.model, &device)?;
        let mut handle = Self::from_model(model, config, device)?;
        handle.metadata = Some(metadata);
        info!("Model handle ready from {}", checkpoint.display());
        Ok(handle)
    }

    /// Wrap an in-memory model
    pub fn from_model(model: SiameseChangeNet<B>, config: &PipelineConfig, device: B::Device) -> Result<Self> {
        Ok(Self {
            model,
            metadata: None,
            inferencer: SlidingWindowInferencer::from_config(&config.inference)?,
            scorer: ChangeScorer::from_config(&config.inference),
            device,
        })
    }

    pub fn metadata(&self) -> Option<&CheckpointMetadata> {
        self.metadata.as_ref()
    }

    pub fn scorer(&self) -> &ChangeScorer {
        &self.scorer
    }

    pub fn predict_map(&self, before: &Raster, after: &Raster) -> Result<ChangeMap> {
        self.inferencer
            .run::<B, _>(&self.model, before, after, &self.device)
    }

    pub fn predict_scene(&self, before: &Raster, after: &Raster) -> Result<ScenePredictionResponse> {
        let map = self.predict_map(before, after)?;
        Ok(self.scorer.score(&map))
    }

    /// Predict and store the change map as a little-endian f32 blob in `out_dir`
    pub fn predict_full(&self, before: &Raster, after: &Raster, out_dir: &Path) -> Result<FullPredictionResponse> {
        let map = self.predict_map(before, after)?;
        let name = format!(
            "change_{}_{}.f32",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f"),
            MAP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let result_path = out_dir.join(name);
        map.write_le_f32(&result_path)?;
        Ok(FullPredictionResponse {
            result_path,
            shape: map.shape(),
        })
    }
}
