//! Inference-time window planning
//!
//! Windows start at every multiple of the stride inside `[0, H) × [0, W)`
//! and are clipped to the raster. A clipped window is zero-padded to the
//! tile size before the forward pass and its output cropped back afterwards.

use crate::utils::error::{Result, SentinelError};

/// One inference window: origin plus the valid (unpadded) extent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub y: usize,
    pub x: usize,
    pub height: usize,
    pub width: usize,
}

#[derive(Debug, Clone)]
pub struct WindowPlan {
    height: usize,
    width: usize,
    tile_size: usize,
    stride: usize,
    windows: Vec<Window>,
}

impl WindowPlan {
    pub fn new(height: usize, width: usize, tile_size: usize, stride: usize) -> Result<Self> {
        if tile_size == 0 || stride == 0 || stride > tile_size {
            return Err(SentinelError::Configuration(format!(
                "stride must satisfy 0 < stride <= tile_size, got stride {} and tile size {}",
                stride, tile_size
            )));
        }
        if height == 0 || width == 0 {
            return Err(SentinelError::Inference(format!(
                "cannot tile an empty {}x{} raster",
                height, width
            )));
        }

        let mut windows = Vec::new();
        for y in (0..height).step_by(stride) {
            for x in (0..width).step_by(stride) {
                windows.push(Window {
                    y,
                    x,
                    height: tile_size.min(height - y),
                    width: tile_size.min(width - x),
                });
            }
        }

        Ok(Self {
            height,
            width,
            tile_size,
            stride,
            windows,
        })
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_overlapping(&self) -> bool {
        self.stride < self.tile_size
    }

    /// Number of windows covering each pixel, row-major. Every pixel is
    /// covered at least once.
    pub fn coverage(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.height * self.width];
        for w in &self.windows {
            for row in w.y..w.y + w.height {
                let start = row * self.width + w.x;
                for c in &mut counts[start..start + w.width] {
                    *c += 1;
                }
            }
        }
        counts
    }
}
