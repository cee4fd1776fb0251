//! Model checkpointing
//!
//! Each checkpoint is a weight file written with Burn's `CompactRecorder`
//! plus a JSON sidecar (`last.json` / `best.json`) naming the weight file and
//! the architecture it is valid for.
//!
//! Saving writes both files under `.staging/`, moves the weights into place
//! under an epoch-specific name, then renames the sidecar. The sidecar rename
//! is the commit point: a reader always sees a sidecar whose weights exist
//! and match it.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::{ArchitectureTag, SiameseChangeNet, SiameseChangeNetConfig};
use crate::utils::error::{Result, SentinelError};

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

const STAGING_DIR: &str = ".staging";
const WEIGHTS_EXTENSION: &str = "mpk";

/// Which checkpoint slot to write or read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Overwritten after every epoch
    Last,
    /// Overwritten only when validation loss strictly improves
    Best,
}

impl CheckpointKind {
    pub fn name(&self) -> &'static str {
        match self {
            CheckpointKind::Last => "last",
            CheckpointKind::Best => "best",
        }
    }
}

/// Sidecar stored next to the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    pub architecture: ArchitectureTag,
    /// 1-based epoch the weights were taken after
    pub epoch: usize,
    pub val_loss: f64,
    /// RFC 3339
    pub timestamp: String,
    /// Weight file name, relative to the sidecar's directory
    pub weights_file: String,
}

impl CheckpointMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            SentinelError::ModelLoad(format!("cannot read checkpoint metadata {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            SentinelError::ModelLoad(format!("invalid checkpoint metadata {}: {}", path.display(), e))
        })
    }

    /// Check that the checkpoint was produced for `config`
    pub fn check_compatible(&self, config: &SiameseChangeNetConfig) -> Result<()> {
        if self.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(SentinelError::ModelLoad(format!(
                "checkpoint format version {} is not supported (expected {})",
                self.format_version, CHECKPOINT_FORMAT_VERSION
            )));
        }
        let expected = config.architecture();
        if self.architecture != expected {
            return Err(SentinelError::ModelLoad(format!(
                "checkpoint architecture {:?} does not match requested {:?}",
                self.architecture, expected
            )));
        }
        Ok(())
    }
}

/// Load a checkpoint from its sidecar path.
///
/// The sidecar is validated against `config` before any weights are read,
/// and the loaded weights are shape-checked before the model is returned.
pub fn load_checkpoint<B: Backend>(
    metadata_path: &Path,
    config: &SiameseChangeNetConfig,
    device: &B::Device,
) -> Result<(SiameseChangeNet<B>, CheckpointMetadata)> {
    let metadata = CheckpointMetadata::load(metadata_path)?;
    metadata.check_compatible(config)?;

    let dir = metadata_path.parent().unwrap_or_else(|| Path::new("."));
    let weights = dir.join(&metadata.weights_file);
    if !weights.is_file() {
        return Err(SentinelError::ModelLoad(format!(
            "weights file {} is missing",
            weights.display()
        )));
    }

    let fresh = config
        .init::<B>(device)
        .map_err(|e| SentinelError::ModelLoad(e.to_string()))?;
    let record: <SiameseChangeNet<B> as Module<B>>::Record = CompactRecorder::new()
        .load(weights.clone(), device)
        .map_err(|e| SentinelError::ModelLoad(format!("failed to load {}: {:?}", weights.display(), e)))?;

    // Applying a record with a different stage count would panic.
    let (downs, ups) = (record.encoder.downs.len(), record.decoder.len());
    if downs != config.encoder_depth || ups != config.encoder_depth {
        return Err(SentinelError::ModelLoad(format!(
            "weights {} have {} encoder and {} decoder stages, expected {}",
            weights.display(),
            downs,
            ups,
            config.encoder_depth
        )));
    }

    let model = fresh.load_record(record);
    model.validate_shapes()?;

    info!(
        "Loaded checkpoint {} (epoch {}, val loss {:.4})",
        metadata_path.display(),
        metadata.epoch,
        metadata.val_loss
    );
    Ok((model, metadata))
}

/// Writes and reads the last/best checkpoint pair of one training run
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// Path of the sidecar for a slot
    pub fn metadata_path(&self, kind: CheckpointKind) -> PathBuf {
        self.checkpoint_dir.join(format!("{}.json", kind.name()))
    }

    pub fn exists(&self, kind: CheckpointKind) -> bool {
        self.metadata_path(kind).is_file()
    }

    /// Save the model into a slot, replacing what was there
    pub fn save<B: Backend>(
        &self,
        kind: CheckpointKind,
        model: &SiameseChangeNet<B>,
        epoch: usize,
        val_loss: f64,
    ) -> Result<CheckpointMetadata> {
        let staging = self.checkpoint_dir.join(STAGING_DIR);
        fs::create_dir_all(&staging)?;

        let stem = format!("{}-e{:04}", kind.name(), epoch);
        let weights_file = format!("{}.{}", stem, WEIGHTS_EXTENSION);
        let metadata = CheckpointMetadata {
            format_version: CHECKPOINT_FORMAT_VERSION,
            architecture: model.architecture(),
            epoch,
            val_loss,
            timestamp: chrono::Utc::now().to_rfc3339(),
            weights_file: weights_file.clone(),
        };

        let previous = CheckpointMetadata::load(&self.metadata_path(kind)).ok();

        model
            .clone()
            .save_file(staging.join(&stem), &CompactRecorder::new())
            .map_err(|e| SentinelError::Serialization(format!("failed to save model: {:?}", e)))?;
        let staged_metadata = staging.join(format!("{}.json", kind.name()));
        fs::write(&staged_metadata, serde_json::to_string_pretty(&metadata)?)?;

        fs::rename(staging.join(&weights_file), self.checkpoint_dir.join(&weights_file))?;
        fs::rename(&staged_metadata, self.metadata_path(kind))?;

        if let Some(previous) = previous {
            if previous.weights_file != weights_file {
                let stale = self.checkpoint_dir.join(&previous.weights_file);
                if let Err(e) = fs::remove_file(&stale) {
                    warn!("Failed to remove superseded weights {:?}: {}", stale, e);
                }
            }
        }

        debug!("Saved {} checkpoint for epoch {} to {:?}", kind.name(), epoch, self.checkpoint_dir);
        Ok(metadata)
    }

    pub fn load_metadata(&self, kind: CheckpointKind) -> Result<CheckpointMetadata> {
        CheckpointMetadata::load(&self.metadata_path(kind))
    }

    pub fn load<B: Backend>(
        &self,
        kind: CheckpointKind,
        config: &SiameseChangeNetConfig,
        device: &B::Device,
    ) -> Result<(SiameseChangeNet<B>, CheckpointMetadata)> {
        load_checkpoint(&self.metadata_path(kind), config, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn config() -> SiameseChangeNetConfig {
        SiameseChangeNetConfig::new()
            .with_base_filters(2)
            .with_encoder_depth(1)
            .with_tile_size(8)
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = config().init::<TestBackend>(&device).unwrap();
        let manager = CheckpointManager::new(dir.path());

        let meta = manager.save(CheckpointKind::Best, &model, 3, 0.42).unwrap();
        assert_eq!(meta.weights_file, "best-e0003.mpk");
        assert!(manager.exists(CheckpointKind::Best));
        assert!(!manager.exists(CheckpointKind::Last));

        let (loaded, meta) = manager
            .load::<TestBackend>(CheckpointKind::Best, &config(), &device)
            .unwrap();
        assert_eq!(meta.epoch, 3);
        assert_eq!(meta.val_loss, 0.42);
        assert_eq!(loaded.architecture(), config().architecture());
    }

    #[test]
    fn test_overwrite_removes_superseded_weights() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = config().init::<TestBackend>(&device).unwrap();
        let manager = CheckpointManager::new(dir.path());

        manager.save(CheckpointKind::Last, &model, 1, 1.0).unwrap();
        manager.save(CheckpointKind::Last, &model, 2, 0.9).unwrap();

        assert!(!dir.path().join("last-e0001.mpk").exists());
        assert!(dir.path().join("last-e0002.mpk").exists());
        assert_eq!(manager.load_metadata(CheckpointKind::Last).unwrap().epoch, 2);
        assert_eq!(
            fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count(),
            0
        );
    }

    #[test]
    fn test_architecture_mismatch_is_model_load_error() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = config().init::<TestBackend>(&device).unwrap();
        let manager = CheckpointManager::new(dir.path());
        manager.save(CheckpointKind::Last, &model, 1, 1.0).unwrap();

        let six_channels = config().with_in_channels(6);
        let err = manager
            .load::<TestBackend>(CheckpointKind::Last, &six_channels, &device)
            .unwrap_err();
        assert!(matches!(err, SentinelError::ModelLoad(_)));

        let deeper = config().with_encoder_depth(2);
        let err = manager
            .load::<TestBackend>(CheckpointKind::Last, &deeper, &device)
            .unwrap_err();
        assert!(matches!(err, SentinelError::ModelLoad(_)));
    }

    #[test]
    fn test_missing_checkpoint_is_model_load_error() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let err = manager
            .load::<TestBackend>(CheckpointKind::Best, &config(), &Default::default())
            .unwrap_err();
        assert!(matches!(err, SentinelError::ModelLoad(_)));
    }

    /// Rewrite a sidecar so it claims a different architecture than the
    /// weights next to it actually have.
    fn forge_architecture(manager: &CheckpointManager, kind: CheckpointKind, claimed: &SiameseChangeNetConfig) {
        let mut meta = manager.load_metadata(kind).unwrap();
        meta.architecture = claimed.architecture();
        fs::write(manager.metadata_path(kind), serde_json::to_string_pretty(&meta).unwrap()).unwrap();
    }

    #[test]
    fn test_deeper_weights_under_shallow_sidecar_are_rejected() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let deep = config().with_encoder_depth(2);
        let model = deep.init::<TestBackend>(&device).unwrap();
        let manager = CheckpointManager::new(dir.path());
        manager.save(CheckpointKind::Best, &model, 1, 0.5).unwrap();
        forge_architecture(&manager, CheckpointKind::Best, &config());

        let err = manager
            .load::<TestBackend>(CheckpointKind::Best, &config(), &device)
            .unwrap_err();
        assert!(matches!(err, SentinelError::ModelLoad(_)));
    }

    #[test]
    fn test_wider_weights_under_matching_depth_are_rejected() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let wide = config().with_base_filters(4);
        let model = wide.init::<TestBackend>(&device).unwrap();
        let manager = CheckpointManager::new(dir.path());
        manager.save(CheckpointKind::Best, &model, 1, 0.5).unwrap();
        forge_architecture(&manager, CheckpointKind::Best, &config());

        let err = manager
            .load::<TestBackend>(CheckpointKind::Best, &config(), &device)
            .unwrap_err();
        assert!(matches!(err, SentinelError::ModelLoad(_)));
    }
}
