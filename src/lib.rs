//! # Planet Sentinel
//!
//! Land-cover change detection on paired ("before"/"after") satellite
//! rasters using the Burn framework.
//!
//! ## Modules
//!
//! - `raster`: in-memory rasters, tile naming and raster file I/O
//! - `dataset`: chip extraction, proxy masks, channel adaptation, Burn dataset/batcher
//! - `model`: the shared-encoder SiameseChangeNet
//! - `training`: BCE + Dice loss, trainer state machine, checkpoints
//! - `inference`: sliding-window inference, scoring and the model handle
//! - `utils`: errors, logging and pixel metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use planet_sentinel::inference::ModelHandle;
//! use planet_sentinel::raster::read_raster;
//!
//! let handle = ModelHandle::<DefaultBackend>::load("checkpoints/best.json".as_ref(), &config, device)?;
//! let response = handle.predict_scene(&read_raster(before)?, &read_raster(after)?)?;
//! println!("{} ({:.3})", response.status, response.anomaly_score);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod raster;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{ChipConfig, InferenceConfig, PipelineConfig, TrainerConfig};
pub use dataset::{ChangeDataset, ChannelAdapter, ChipExtractor, MaskStrategy};
pub use inference::{ChangeMap, ChangeScorer, ModelHandle, SlidingWindowInferencer};
pub use model::{ChangeModel, SiameseChangeNet, SiameseChangeNetConfig};
pub use raster::Raster;
pub use training::{CheckpointManager, Trainer};
pub use utils::error::{Result, SentinelError};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
