//! Training module: loss, trainer state machine and checkpoints

pub mod checkpoint;
pub mod loss;
pub mod trainer;

pub use checkpoint::{load_checkpoint, CheckpointKind, CheckpointManager, CheckpointMetadata};
pub use loss::{bce_with_logits, pixel_counts, soft_dice_loss, ChangeLoss};
pub use trainer::{run_training, EpochRecord, Trainer, TrainerPhase, TrainingSummary};
