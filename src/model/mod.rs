//! Model module for change detection
//!
//! - `siamese`: the shared-encoder SiameseChangeNet
//! - `ChangeModel`: the seam the sliding-window inferencer runs against

pub mod siamese;

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

pub use siamese::{SiameseChangeNet, SiameseChangeNetConfig};

/// Architecture parameters a checkpoint is valid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureTag {
    pub in_channels: usize,
    pub encoder_depth: usize,
    pub base_filters: usize,
    pub tile_size: usize,
}

/// A model mapping a before/after tile pair to a change-probability map
pub trait ChangeModel<B: Backend> {
    /// Channels expected for each input tile
    fn in_channels(&self) -> usize;

    /// Tile edge length the model runs on
    fn tile_size(&self) -> usize;

    /// [N, C, S, S] × 2 -> [N, 1, S, S] probabilities in [0, 1]
    fn predict(&self, before: Tensor<B, 4>, after: Tensor<B, 4>) -> Result<Tensor<B, 4>>;
}
