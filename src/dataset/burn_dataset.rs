//! Burn Dataset Integration for change tiles
//!
//! `ChangeDataset` implements Burn's `Dataset` over tile triplets, either
//! loading lazily from disk, pre-loading in parallel, or wrapping samples
//! already held in memory. `ChangeBatcher` stacks items into tensors.

use std::sync::atomic::{AtomicUsize, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};

use super::adapter::ChannelAdapter;
use crate::raster::{read_raster, Raster, TileAddress, TileTriplet};
use crate::utils::error::{Result, SentinelError};

/// One normalized training sample
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeItem {
    pub address: TileAddress,
    /// Before tile as flattened CHW in [0, 1]
    pub before: Vec<f32>,
    /// After tile as flattened CHW in [0, 1]
    pub after: Vec<f32>,
    /// Binary mask as flattened HW of 0.0 / 1.0
    pub mask: Vec<f32>,
}

/// Tensor layout shared by items, batches and the network
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileShape {
    pub channels: usize,
    pub tile_size: usize,
}

impl TileShape {
    pub fn new(channels: usize, tile_size: usize) -> Self {
        Self {
            channels,
            tile_size,
        }
    }

    fn plane(&self) -> usize {
        self.tile_size * self.tile_size
    }
}

fn normalize_tile(
    raster: &Raster,
    shape: TileShape,
    adapter: ChannelAdapter,
    role: &str,
    address: &TileAddress,
) -> Result<Vec<f32>> {
    if raster.dims() != (shape.tile_size, shape.tile_size) {
        return Err(SentinelError::Data(format!(
            "{} tile of {} is {}x{}, expected {}x{}",
            role,
            address,
            raster.height(),
            raster.width(),
            shape.tile_size,
            shape.tile_size
        )));
    }
    adapter.adapt(raster.normalized(), raster.bands(), shape.plane(), shape.channels)
}

impl ChangeItem {
    /// Build an item from rasters and a binary mask
    pub fn from_rasters(
        address: TileAddress,
        before: &Raster,
        after: &Raster,
        mask: &[bool],
        shape: TileShape,
        adapter: ChannelAdapter,
    ) -> Result<Self> {
        if before.bands() != after.bands() {
            return Err(SentinelError::Configuration(format!(
                "{}: before has {} channels, after has {}",
                address,
                before.bands(),
                after.bands()
            )));
        }
        if mask.len() != shape.plane() {
            return Err(SentinelError::Data(format!(
                "mask of {} holds {} pixels, expected {}",
                address,
                mask.len(),
                shape.plane()
            )));
        }

        Ok(Self {
            before: normalize_tile(before, shape, adapter, "before", &address)?,
            after: normalize_tile(after, shape, adapter, "after", &address)?,
            mask: mask.iter().map(|&m| if m { 1.0 } else { 0.0 }).collect(),
            address,
        })
    }

    /// Load a tile triplet from disk
    pub fn from_triplet(triplet: &TileTriplet, shape: TileShape, adapter: ChannelAdapter) -> Result<Self> {
        let before = read_raster(&triplet.before)?;
        let after = read_raster(&triplet.after)?;
        let mask = read_raster(&triplet.mask)?;
        if mask.dims() != before.dims() {
            return Err(SentinelError::Data(format!(
                "mask of {} is {}x{}, imagery is {}x{}",
                triplet.address,
                mask.height(),
                mask.width(),
                before.height(),
                before.width()
            )));
        }
        Self::from_rasters(
            triplet.address.clone(),
            &before,
            &after,
            &mask.binarized_mask(),
            shape,
            adapter,
        )
    }
}

/// Change-detection dataset implementing Burn's Dataset trait
#[derive(Debug, Clone)]
pub struct ChangeDataset {
    triplets: Vec<TileTriplet>,
    shape: TileShape,
    adapter: ChannelAdapter,
    cached_items: Option<Vec<ChangeItem>>,
}

impl ChangeDataset {
    /// Lazily loading dataset. The first triplet is loaded eagerly so that
    /// channel or size mismatches surface here instead of mid-epoch.
    pub fn new(triplets: Vec<TileTriplet>, shape: TileShape, adapter: ChannelAdapter) -> Result<Self> {
        if adapter == ChannelAdapter::RepeatBlock {
            warn!("Channel adapter RepeatBlock enabled: missing channels will be duplicated");
        }
        if let Some(first) = triplets.first() {
            ChangeItem::from_triplet(first, shape, adapter)?;
        }
        Ok(Self {
            triplets,
            shape,
            adapter,
            cached_items: None,
        })
    }

    /// Pre-load every triplet in parallel. Unreadable samples are logged and
    /// dropped; a channel mismatch aborts.
    pub fn new_cached(triplets: Vec<TileTriplet>, shape: TileShape, adapter: ChannelAdapter) -> Result<Self> {
        if adapter == ChannelAdapter::RepeatBlock {
            warn!("Channel adapter RepeatBlock enabled: missing channels will be duplicated");
        }

        let total = triplets.len();
        info!("Pre-loading {} tile triplets into memory", total);

        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        let loaded = AtomicUsize::new(0);

        let results: Vec<Result<ChangeItem>> = triplets
            .par_iter()
            .map(|t| {
                let item = ChangeItem::from_triplet(t, shape, adapter);
                let count = loaded.fetch_add(1, Ordering::Relaxed);
                if count % 100 == 0 {
                    pb.set_position(count as u64);
                }
                item
            })
            .collect();
        pb.finish_and_clear();

        let mut items = Vec::with_capacity(total);
        let mut kept = Vec::with_capacity(total);
        for (triplet, result) in triplets.into_iter().zip(results) {
            match result {
                Ok(item) => {
                    items.push(item);
                    kept.push(triplet);
                }
                Err(e) if e.is_skippable() => warn!("Dropping sample {}: {}", triplet.address, e),
                Err(e) => return Err(e),
            }
        }
        info!("Loaded {} of {} tile triplets", items.len(), total);

        Ok(Self {
            triplets: kept,
            shape,
            adapter,
            cached_items: Some(items),
        })
    }

    pub fn from_items(items: Vec<ChangeItem>, shape: TileShape) -> Self {
        Self {
            triplets: Vec::new(),
            shape,
            adapter: ChannelAdapter::Strict,
            cached_items: Some(items),
        }
    }

    pub fn shape(&self) -> TileShape {
        self.shape
    }
}

impl Dataset<ChangeItem> for ChangeDataset {
    fn get(&self, index: usize) -> Option<ChangeItem> {
        if let Some(ref cached) = self.cached_items {
            return cached.get(index).cloned();
        }

        let triplet = self.triplets.get(index)?;
        match ChangeItem::from_triplet(triplet, self.shape, self.adapter) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Failed to load sample {}: {}", triplet.address, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        match self.cached_items {
            Some(ref cached) => cached.len(),
            None => self.triplets.len(),
        }
    }
}

/// A batch of tile pairs and masks
#[derive(Clone, Debug)]
pub struct ChangeBatch<B: Backend> {
    /// [batch, channels, S, S]
    pub before: Tensor<B, 4>,
    /// [batch, channels, S, S]
    pub after: Tensor<B, 4>,
    /// [batch, 1, S, S] of 0.0 / 1.0
    pub masks: Tensor<B, 4>,
}

#[derive(Clone, Debug)]
pub struct ChangeBatcher {
    shape: TileShape,
}

impl ChangeBatcher {
    pub fn new(shape: TileShape) -> Self {
        Self { shape }
    }
}

impl<B: Backend> Batcher<B, ChangeItem, ChangeBatch<B>> for ChangeBatcher {
    fn batch(&self, items: Vec<ChangeItem>, device: &B::Device) -> ChangeBatch<B> {
        let n = items.len();
        let c = self.shape.channels;
        let s = self.shape.tile_size;

        let before: Vec<f32> = items.iter().flat_map(|i| i.before.iter().copied()).collect();
        let after: Vec<f32> = items.iter().flat_map(|i| i.after.iter().copied()).collect();
        let masks: Vec<f32> = items.iter().flat_map(|i| i.mask.iter().copied()).collect();

        ChangeBatch {
            before: Tensor::<B, 4>::from_floats(TensorData::new(before, [n, c, s, s]), device),
            after: Tensor::<B, 4>::from_floats(TensorData::new(after, [n, c, s, s]), device),
            masks: Tensor::<B, 4>::from_floats(TensorData::new(masks, [n, 1, s, s]), device),
        }
    }
}
