//! In-memory rasters
//!
//! A [`Raster`] is a band-major (channels × height × width) array of native
//! pixel values. Values stay in their storage units (0-255, reflectance ×
//! 10000, or float) until the dataset normalizes them with the divisor that
//! belongs to the raster's [`PixelDepth`].

pub mod io;
pub mod tile;

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SentinelError};

pub use io::{
    raster_from_image, raster_to_image, read_geo_transform, read_raster, write_mask, write_raster,
};
pub use tile::{discover_triplets, TileAddress, TileKind, TileTriplet, TripletScan};

/// Storage depth of raster values, which fixes the normalization divisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelDepth {
    /// 8-bit imagery (0-255)
    U8,
    /// 16-bit reflectance scaled by 10000
    U16,
    /// Already-normalized floating point values
    Float,
}

impl PixelDepth {
    /// Divisor that maps native values into [0, 1]
    pub fn divisor(&self) -> f32 {
        match self {
            PixelDepth::U8 => 255.0,
            PixelDepth::U16 => 10_000.0,
            PixelDepth::Float => 1.0,
        }
    }

    /// Largest value the storage type holds
    pub fn native_max(&self) -> f32 {
        match self {
            PixelDepth::U8 => 255.0,
            PixelDepth::U16 => 65_535.0,
            PixelDepth::Float => 1.0,
        }
    }
}

/// Affine geolocation of the top-left pixel, carried through tiling.
///
/// `pixel_height` is negative for north-up imagery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Transform of a window whose top-left pixel is at (y, x)
    pub fn window(&self, y: usize, x: usize) -> Self {
        Self {
            origin_x: self.origin_x + x as f64 * self.pixel_width,
            origin_y: self.origin_y + y as f64 * self.pixel_height,
            ..*self
        }
    }
}

/// Band-major raster with optional geolocation
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    bands: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
    depth: PixelDepth,
    geo: Option<GeoTransform>,
}

impl Raster {
    /// Build a raster from band-major data
    pub fn new(
        bands: usize,
        height: usize,
        width: usize,
        data: Vec<f32>,
        depth: PixelDepth,
    ) -> Result<Self> {
        if data.len() != bands * height * width {
            return Err(SentinelError::Data(format!(
                "raster buffer holds {} values, expected {}x{}x{}",
                data.len(),
                bands,
                height,
                width
            )));
        }
        Ok(Self {
            bands,
            height,
            width,
            data,
            depth,
            geo: None,
        })
    }

    pub fn zeros(bands: usize, height: usize, width: usize, depth: PixelDepth) -> Self {
        Self {
            bands,
            height,
            width,
            data: vec![0.0; bands * height * width],
            depth,
            geo: None,
        }
    }

    pub fn with_geo(mut self, geo: GeoTransform) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// (height, width)
    pub fn dims(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn depth(&self) -> PixelDepth {
        self.depth
    }

    pub fn geo(&self) -> Option<&GeoTransform> {
        self.geo.as_ref()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    fn offset(&self, band: usize, y: usize, x: usize) -> usize {
        (band * self.height + y) * self.width + x
    }

    pub fn get(&self, band: usize, y: usize, x: usize) -> f32 {
        self.data[self.offset(band, y, x)]
    }

    pub fn set(&mut self, band: usize, y: usize, x: usize, value: f32) {
        let i = self.offset(band, y, x);
        self.data[i] = value;
    }

    /// Values of one band, row-major
    pub fn band(&self, band: usize) -> &[f32] {
        let len = self.height * self.width;
        &self.data[band * len..(band + 1) * len]
    }

    /// True when every value in every band is zero
    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    /// Copy of the window with top-left (y, x), which must fit inside bounds
    pub fn window(&self, y: usize, x: usize, height: usize, width: usize) -> Result<Raster> {
        if y + height > self.height || x + width > self.width {
            return Err(SentinelError::Data(format!(
                "window {}x{} at ({}, {}) exceeds raster {}x{}",
                height, width, y, x, self.height, self.width
            )));
        }

        let mut data = Vec::with_capacity(self.bands * height * width);
        for b in 0..self.bands {
            for row in y..y + height {
                let start = self.offset(b, row, x);
                data.extend_from_slice(&self.data[start..start + width]);
            }
        }

        Ok(Raster {
            bands: self.bands,
            height,
            width,
            data,
            depth: self.depth,
            geo: self.geo.map(|g| g.window(y, x)),
        })
    }

    /// Window clipped to bounds and zero-padded at the bottom/right to
    /// `size`×`size`. Returns the padded raster and the clipped extent.
    pub fn padded_window(&self, y: usize, x: usize, size: usize) -> (Raster, usize, usize) {
        let valid_h = size.min(self.height.saturating_sub(y));
        let valid_w = size.min(self.width.saturating_sub(x));

        let mut out = Raster::zeros(self.bands, size, size, self.depth);
        out.geo = self.geo.map(|g| g.window(y, x));
        for b in 0..self.bands {
            for row in 0..valid_h {
                let src = self.offset(b, y + row, x);
                let dst = out.offset(b, row, 0);
                out.data[dst..dst + valid_w].copy_from_slice(&self.data[src..src + valid_w]);
            }
        }
        (out, valid_h, valid_w)
    }

    /// All values scaled into [0, 1] by the depth divisor
    pub fn normalized(&self) -> Vec<f32> {
        let divisor = self.depth.divisor();
        self.data.iter().map(|&v| v / divisor).collect()
    }

    /// First band binarized at half of the storage type's range, on raw
    /// values (8-bit masks: > 127)
    pub fn binarized_mask(&self) -> Vec<bool> {
        let cut = self.depth.native_max() / 2.0;
        self.band(0).iter().map(|&v| v > cut).collect()
    }
}
