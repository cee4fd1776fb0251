//! Training loop for SiameseChangeNet
//!
//! The trainer walks `Idle → Training(e) → Validating(e) → CheckpointDecision(e)
//! → Training(e+1) … → Done`. A non-finite batch loss moves it to `Failed` and
//! ends the run before any checkpoint is written for that epoch.

use std::path::Path;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        activation::sigmoid,
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::checkpoint::{CheckpointKind, CheckpointManager};
use super::loss::{pixel_counts, ChangeLoss};
use crate::config::{PipelineConfig, TrainerConfig};
use crate::dataset::{
    train_val_split, ChangeBatch, ChangeBatcher, ChangeDataset, ChangeItem, SplitConfig, TileShape,
};
use crate::model::{SiameseChangeNet, SiameseChangeNetConfig};
use crate::raster::discover_triplets;
use crate::utils::error::{Result, SentinelError};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{BinaryMetrics, MetricsAccumulator};

/// Where the trainer is in its epoch cycle (epochs are 1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrainerPhase {
    Idle,
    Training { epoch: usize },
    Validating { epoch: usize },
    CheckpointDecision { epoch: usize },
    Done,
    Failed,
}

/// Per-epoch report, also written to `history.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_metrics: BinaryMetrics,
    pub val_loss: f64,
    pub val_metrics: BinaryMetrics,
    pub is_best: bool,
}

/// "best" is replaced only on strict improvement
pub fn is_improvement(best_val_loss: f64, val_loss: f64) -> bool {
    val_loss < best_val_loss
}

pub struct Trainer<B: AutodiffBackend> {
    config: TrainerConfig,
    shape: TileShape,
    device: B::Device,
    loss: ChangeLoss,
    checkpoints: CheckpointManager,
    phase: TrainerPhase,
    best_val_loss: f64,
    history: Vec<EpochRecord>,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainerConfig, model_config: &SiameseChangeNetConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        model_config.validate()?;

        let loss = ChangeLoss {
            bce_weight: config.bce_weight,
            dice_weight: config.dice_weight,
            dice_epsilon: config.dice_epsilon,
        };
        let checkpoints = CheckpointManager::new(config.checkpoint_dir.clone());

        Ok(Self {
            shape: TileShape::new(model_config.in_channels, model_config.tile_size),
            config,
            device,
            loss,
            checkpoints,
            phase: TrainerPhase::Idle,
            best_val_loss: f64::INFINITY,
            history: Vec::new(),
        })
    }

    pub fn phase(&self) -> TrainerPhase {
        self.phase
    }

    pub fn best_val_loss(&self) -> f64 {
        self.best_val_loss
    }

    pub fn history(&self) -> &[EpochRecord] {
        &self.history
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Train for the configured number of epochs and return the final model
    pub fn fit(
        &mut self,
        model: SiameseChangeNet<B>,
        train: &ChangeDataset,
        val: &ChangeDataset,
    ) -> Result<SiameseChangeNet<B>> {
        if train.len() == 0 {
            return Err(SentinelError::Data("training set is empty".into()));
        }
        if val.len() == 0 {
            return Err(SentinelError::Configuration(
                "validation set is empty; raise validation_fraction or add tiles".into(),
            ));
        }
        if train.shape() != self.shape || val.shape() != self.shape {
            return Err(SentinelError::Configuration(format!(
                "dataset tiles {:?} do not match model input {:?}",
                train.shape(),
                self.shape
            )));
        }
        std::fs::create_dir_all(&self.config.checkpoint_dir)?;

        self.train_loop(model, train, val)
    }

    /// Epoch loop over any tile dataset; any error leaves the trainer `Failed`
    fn train_loop<D: Dataset<ChangeItem>>(
        &mut self,
        model: SiameseChangeNet<B>,
        train: &D,
        val: &D,
    ) -> Result<SiameseChangeNet<B>> {
        let mut optimizer = AdamConfig::new().init();
        let result = self.run(model, &mut optimizer, train, val);
        if result.is_err() {
            self.phase = TrainerPhase::Failed;
        }
        result
    }

    fn run<O, D>(
        &mut self,
        mut model: SiameseChangeNet<B>,
        optimizer: &mut O,
        train: &D,
        val: &D,
    ) -> Result<SiameseChangeNet<B>>
    where
        O: Optimizer<SiameseChangeNet<B>, B>,
        D: Dataset<ChangeItem>,
    {
        info!(
            "Training on {} tiles, validating on {} tiles, {} epochs, batch size {}",
            train.len(),
            val.len(),
            self.config.epochs,
            self.config.batch_size
        );

        let mut logger = TrainingLogger::new(self.config.epochs);
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        for epoch in 1..=self.config.epochs {
            logger.start_epoch(epoch - 1);

            self.phase = TrainerPhase::Training { epoch };
            let (next, train_acc) = self.train_epoch(model, optimizer, train, epoch, &mut rng)?;
            model = next;

            self.phase = TrainerPhase::Validating { epoch };
            let val_acc = self.validate_epoch(&model, val, epoch)?;

            self.phase = TrainerPhase::CheckpointDecision { epoch };
            let val_loss = val_acc.mean_loss();
            let previous_best = self.best_val_loss;
            let is_best = self.checkpoint(&model, epoch, val_loss)?;
            if is_best {
                logger.log_new_best(previous_best, val_loss);
            }

            let record = EpochRecord {
                epoch,
                train_loss: train_acc.mean_loss(),
                train_metrics: train_acc.mean_metrics(),
                val_loss,
                val_metrics: val_acc.mean_metrics(),
                is_best,
            };
            logger.end_epoch(record.train_loss, record.val_loss, record.val_metrics.f1);
            self.history.push(record);
            self.write_history()?;
        }

        self.phase = TrainerPhase::Done;
        logger.log_complete(self.best_val_loss);
        Ok(model)
    }

    /// Save `last` and, on strict improvement, `best`. Returns whether
    /// `best` was replaced.
    fn checkpoint(&mut self, model: &SiameseChangeNet<B>, epoch: usize, val_loss: f64) -> Result<bool> {
        self.checkpoints.save(CheckpointKind::Last, model, epoch, val_loss)?;

        let is_best = is_improvement(self.best_val_loss, val_loss);
        if is_best {
            self.checkpoints.save(CheckpointKind::Best, model, epoch, val_loss)?;
            self.best_val_loss = val_loss;
        }
        Ok(is_best)
    }

    fn train_epoch<O, D>(
        &self,
        mut model: SiameseChangeNet<B>,
        optimizer: &mut O,
        dataset: &D,
        epoch: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<(SiameseChangeNet<B>, MetricsAccumulator)>
    where
        O: Optimizer<SiameseChangeNet<B>, B>,
        D: Dataset<ChangeItem>,
    {
        let batcher = ChangeBatcher::new(self.shape);
        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        indices.shuffle(rng);

        let mut acc = MetricsAccumulator::new();
        let mut skipped = 0;
        for (batch_idx, chunk) in indices.chunks(self.config.batch_size).enumerate() {
            let items = load_batch(dataset, chunk, epoch, batch_idx + 1, &mut skipped)?;
            let batch: ChangeBatch<B> = batcher.batch(items, &self.device);

            let logits = model.forward_logits(batch.before, batch.after)?;
            let loss = self.loss.forward(logits.clone(), batch.masks.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(SentinelError::TrainingFatal {
                    epoch,
                    batch: batch_idx + 1,
                    loss: loss_value,
                });
            }

            let counts = pixel_counts(sigmoid(logits), batch.masks, self.config.metric_threshold);
            acc.push(loss_value, &BinaryMetrics::from_counts(&counts));

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(self.config.learning_rate, model, grads);

            debug!("Epoch {} batch {}: loss = {:.4}", epoch, batch_idx + 1, loss_value);
        }
        warn_skipped(skipped, dataset.len(), epoch, "training");
        Ok((model, acc))
    }

    fn validate_epoch<D: Dataset<ChangeItem>>(
        &self,
        model: &SiameseChangeNet<B>,
        dataset: &D,
        epoch: usize,
    ) -> Result<MetricsAccumulator> {
        let model = model.valid();
        let batcher = ChangeBatcher::new(self.shape);
        let device = <B::InnerBackend as Backend>::Device::default();

        let mut acc = MetricsAccumulator::new();
        let mut skipped = 0;
        let indices: Vec<usize> = (0..dataset.len()).collect();
        for (batch_idx, chunk) in indices.chunks(self.config.batch_size).enumerate() {
            let items = load_batch(dataset, chunk, epoch, batch_idx + 1, &mut skipped)?;
            let batch: ChangeBatch<B::InnerBackend> = batcher.batch(items, &device);

            let logits = model.forward_logits(batch.before, batch.after)?;
            let loss_value: f64 = self
                .loss
                .forward(logits.clone(), batch.masks.clone())
                .into_scalar()
                .elem();
            if !loss_value.is_finite() {
                return Err(SentinelError::TrainingFatal {
                    epoch,
                    batch: batch_idx + 1,
                    loss: loss_value,
                });
            }

            let counts = pixel_counts(sigmoid(logits), batch.masks, self.config.metric_threshold);
            acc.push(loss_value, &BinaryMetrics::from_counts(&counts));
        }
        warn_skipped(skipped, dataset.len(), epoch, "validation");
        Ok(acc)
    }

    fn write_history(&self) -> Result<()> {
        let path = self.config.checkpoint_dir.join("history.json");
        std::fs::write(path, serde_json::to_string_pretty(&self.history)?)?;
        Ok(())
    }
}

/// Items of one batch. Tiles that fail to load are added to `skipped`; a
/// batch where none load stops the run.
fn load_batch<D: Dataset<ChangeItem>>(
    dataset: &D,
    chunk: &[usize],
    epoch: usize,
    batch: usize,
    skipped: &mut usize,
) -> Result<Vec<ChangeItem>> {
    let items: Vec<ChangeItem> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
    *skipped += chunk.len() - items.len();
    if items.is_empty() {
        return Err(SentinelError::Data(format!(
            "epoch {} batch {}: none of its {} tiles could be loaded",
            epoch,
            batch,
            chunk.len()
        )));
    }
    Ok(items)
}

fn warn_skipped(skipped: usize, total: usize, epoch: usize, pass: &str) {
    if skipped > 0 {
        warn!(
            "Epoch {}: skipped {} of {} {} tiles that failed to load",
            epoch, skipped, total, pass
        );
    }
}

/// Summary of a directory-driven training run
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub train_tiles: usize,
    pub val_tiles: usize,
    pub best_val_loss: f64,
    pub history: Vec<EpochRecord>,
}

/// Discover tile triplets in `tile_dir`, split them, and train a fresh model
pub fn run_training<B: AutodiffBackend>(
    config: &PipelineConfig,
    tile_dir: &Path,
    device: B::Device,
) -> Result<TrainingSummary> {
    config.validate()?;

    let scan = discover_triplets(tile_dir)?;
    let split = SplitConfig {
        validation_fraction: config.trainer.validation_fraction,
        seed: config.trainer.seed,
    };
    let (train_triplets, val_triplets) = train_val_split(scan.triplets, &split)?;

    let shape = TileShape::new(config.model.in_channels, config.model.tile_size);
    let adapter = config.dataset_channel_adapter;
    let train = ChangeDataset::new_cached(train_triplets, shape, adapter)?;
    let val = ChangeDataset::new_cached(val_triplets, shape, adapter)?;

    let model = config.model.init::<B>(&device)?;
    let mut trainer = Trainer::<B>::new(config.trainer.clone(), &config.model, device)?;
    trainer.fit(model, &train, &val)?;

    Ok(TrainingSummary {
        train_tiles: train.len(),
        val_tiles: val.len(),
        best_val_loss: trainer.best_val_loss(),
        history: trainer.history().to_vec(),
    })
}
