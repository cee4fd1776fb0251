//! Dataset module: chip extraction, change labels and Burn integration

pub mod adapter;
pub mod burn_dataset;
pub mod chips;
pub mod mask;
pub mod split;

pub use adapter::ChannelAdapter;
pub use burn_dataset::{ChangeBatch, ChangeBatcher, ChangeDataset, ChangeItem, TileShape};
pub use chips::{find_scene_pairs, ChipExtractor, ChipSample, ExtractionReport, ScenePaths, SourcePair};
pub use mask::MaskStrategy;
pub use split::{train_val_split, SplitConfig};
