//! Pipeline Configuration Module
//!
//! Configuration structures for chipping, training and inference, saved and
//! loaded as pretty JSON. Every section validates itself before use so bad
//! settings surface as `Configuration` errors before any work starts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::{ChannelAdapter, MaskStrategy};
use crate::model::SiameseChangeNetConfig;
use crate::utils::error::{Result, SentinelError};

/// Chip extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipConfig {
    /// Tile edge length S in pixels
    pub tile_size: usize,

    /// Step T between window origins
    pub stride: usize,

    /// Label source, always chosen explicitly
    pub mask_strategy: MaskStrategy,

    /// Extension of written tiles (`png` or `tif`)
    pub extension: String,
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            stride: 256,
            mask_strategy: MaskStrategy::default(),
            extension: "png".to_string(),
        }
    }
}

impl ChipConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(SentinelError::Configuration("tile_size must be > 0".into()));
        }
        if self.stride == 0 {
            return Err(SentinelError::Configuration("stride must be > 0".into()));
        }
        if self.extension.is_empty() || self.extension.contains('.') {
            return Err(SentinelError::Configuration(format!(
                "extension must be a bare extension like \"png\", got {:?}",
                self.extension
            )));
        }
        Ok(())
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Number of training epochs
    pub epochs: usize,

    /// Batch size for training and validation
    pub batch_size: usize,

    /// Adam learning rate
    pub learning_rate: f64,

    /// Random seed for the split and epoch shuffles
    pub seed: u64,

    /// Fraction of samples held out for validation
    pub validation_fraction: f64,

    /// Weight of the BCE term
    pub bce_weight: f64,

    /// Weight of the Dice term
    pub dice_weight: f64,

    /// Dice smoothing epsilon
    pub dice_epsilon: f64,

    /// Probability above which a pixel counts as predicted change
    pub metric_threshold: f64,

    /// Directory holding the last/best checkpoints and history
    pub checkpoint_dir: PathBuf,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 8,
            learning_rate: 1e-4,
            seed: 42,
            validation_fraction: 0.1,
            bce_weight: 1.0,
            dice_weight: 1.0,
            dice_epsilon: 1e-6,
            metric_threshold: 0.5,
            checkpoint_dir: PathBuf::from("checkpoints"),
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(SentinelError::Configuration("epochs must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(SentinelError::Configuration("batch_size must be > 0".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(SentinelError::Configuration(
                "learning_rate must be a positive finite number".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(SentinelError::Configuration(
                "validation_fraction must be in [0.0, 1.0)".into(),
            ));
        }
        if self.bce_weight < 0.0 || self.dice_weight < 0.0 {
            return Err(SentinelError::Configuration(
                "loss weights must be non-negative".into(),
            ));
        }
        if self.bce_weight + self.dice_weight == 0.0 {
            return Err(SentinelError::Configuration(
                "at least one loss weight must be positive".into(),
            ));
        }
        if self.dice_epsilon <= 0.0 {
            return Err(SentinelError::Configuration("dice_epsilon must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.metric_threshold) {
            return Err(SentinelError::Configuration(
                "metric_threshold must be in [0.0, 1.0)".into(),
            ));
        }
        Ok(())
    }
}

/// Sliding-window inference and scoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Network tile size S
    pub tile_size: usize,

    /// Window step T, 0 < T <= S
    pub stride: usize,

    /// Per-pixel probability threshold
    pub pixel_threshold: f64,

    /// Scene-level anomaly score threshold
    pub scene_threshold: f64,

    /// How tiles with fewer channels than the network are handled
    pub channel_adapter: ChannelAdapter,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            stride: 256,
            pixel_threshold: 0.5,
            scene_threshold: 0.1,
            channel_adapter: ChannelAdapter::Strict,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(SentinelError::Configuration("tile_size must be > 0".into()));
        }
        if self.stride == 0 || self.stride > self.tile_size {
            return Err(SentinelError::Configuration(format!(
                "stride must satisfy 0 < stride <= tile_size ({}), got {}",
                self.tile_size, self.stride
            )));
        }
        for (name, t) in [
            ("pixel_threshold", self.pixel_threshold),
            ("scene_threshold", self.scene_threshold),
        ] {
            if !(0.0..=1.0).contains(&t) {
                return Err(SentinelError::Configuration(format!(
                    "{} must be in [0.0, 1.0], got {}",
                    name, t
                )));
            }
        }
        Ok(())
    }
}

/// Complete pipeline configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    pub model: SiameseChangeNetConfig,
    pub chips: ChipConfig,
    pub trainer: TrainerConfig,
    pub inference: InferenceConfig,
    /// Channel handling when building training datasets
    #[serde(default)]
    pub dataset_channel_adapter: ChannelAdapter,
}

impl PipelineConfig {
    /// Validate every section and their cross-section constraints
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.chips.validate()?;
        self.trainer.validate()?;
        self.inference.validate()?;

        if self.chips.tile_size != self.model.tile_size {
            return Err(SentinelError::Configuration(format!(
                "chip tile_size {} differs from model tile_size {}",
                self.chips.tile_size, self.model.tile_size
            )));
        }
        if self.inference.tile_size != self.model.tile_size {
            return Err(SentinelError::Configuration(format!(
                "inference tile_size {} differs from model tile_size {}",
                self.inference.tile_size, self.model.tile_size
            )));
        }
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| SentinelError::Configuration(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }
}
