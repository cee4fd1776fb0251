//! Change-label strategies
//!
//! The label source for a source pair is always chosen by the caller.
//! `ExplicitMask` requires a ground-truth raster; the proxy strategies derive
//! a best-effort label from the imagery itself and ignore any supplied mask.
//!
//! Proxies address bands by index. The NDVI defaults assume 4-band analytic
//! scenes ordered Blue, Green, Red, NIR. The RGB defaults assume 3-band
//! imagery ordered Red, Green, Blue; [`MaskStrategy::rgb_diff_bgrn`] reads the
//! visible bands of a Blue, Green, Red, NIR scene instead.

use serde::{Deserialize, Serialize};

use crate::raster::Raster;
use crate::utils::error::{Result, SentinelError};

/// Default NDVI delta above which a pixel is marked as changed
pub const DEFAULT_NDVI_THRESHOLD: f32 = 0.2;

/// Default grayscale difference (on 8-bit scale) for the RGB proxy
pub const DEFAULT_RGB_DIFF_THRESHOLD: f32 = 40.0 / 255.0;

/// Red, green, blue band indices of 3-band RGB imagery
pub const RGB_BANDS: [usize; 3] = [0, 1, 2];

/// Red, green, blue band indices of Blue, Green, Red, NIR imagery
pub const BGRN_RGB_BANDS: [usize; 3] = [2, 1, 0];

fn default_rgb_bands() -> [usize; 3] {
    RGB_BANDS
}

/// Where change labels come from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MaskStrategy {
    /// Use the supplied ground-truth mask raster
    ExplicitMask,
    /// NDVI(before) - NDVI(after) > threshold
    NdviProxy {
        nir_band: usize,
        red_band: usize,
        threshold: f32,
    },
    /// |luma(after) - luma(before)| > threshold, on normalized values
    RgbDiffProxy {
        /// Indices of the red, green and blue bands
        #[serde(default = "default_rgb_bands")]
        rgb_bands: [usize; 3],
        threshold: f32,
    },
}

impl Default for MaskStrategy {
    fn default() -> Self {
        Self::ndvi()
    }
}

impl MaskStrategy {
    /// NDVI proxy for Blue, Green, Red, NIR band ordering
    pub fn ndvi() -> Self {
        MaskStrategy::NdviProxy {
            nir_band: 3,
            red_band: 2,
            threshold: DEFAULT_NDVI_THRESHOLD,
        }
    }

    /// RGB difference proxy for Red, Green, Blue band ordering
    pub fn rgb_diff() -> Self {
        MaskStrategy::RgbDiffProxy {
            rgb_bands: RGB_BANDS,
            threshold: DEFAULT_RGB_DIFF_THRESHOLD,
        }
    }

    /// RGB difference proxy for the same Blue, Green, Red, NIR ordering
    /// that [`MaskStrategy::ndvi`] assumes
    pub fn rgb_diff_bgrn() -> Self {
        MaskStrategy::RgbDiffProxy {
            rgb_bands: BGRN_RGB_BANDS,
            threshold: DEFAULT_RGB_DIFF_THRESHOLD,
        }
    }

    pub fn is_proxy(&self) -> bool {
        !matches!(self, MaskStrategy::ExplicitMask)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MaskStrategy::ExplicitMask => "explicit_mask",
            MaskStrategy::NdviProxy { .. } => "ndvi_proxy",
            MaskStrategy::RgbDiffProxy { .. } => "rgb_diff_proxy",
        }
    }

    /// Check the strategy's band requirements against a raster's band count
    pub fn check_bands(&self, bands: usize) -> Result<()> {
        match *self {
            MaskStrategy::ExplicitMask => Ok(()),
            MaskStrategy::NdviProxy {
                nir_band, red_band, ..
            } => {
                if nir_band >= bands || red_band >= bands {
                    return Err(SentinelError::Data(format!(
                        "NDVI proxy needs bands {} (NIR) and {} (red), raster has {}",
                        nir_band, red_band, bands
                    )));
                }
                Ok(())
            }
            MaskStrategy::RgbDiffProxy { rgb_bands, .. } => {
                if rgb_bands.iter().any(|&b| b >= bands) {
                    return Err(SentinelError::Data(format!(
                        "RGB difference proxy needs bands {:?} (red, green, blue), raster has {}",
                        rgb_bands, bands
                    )));
                }
                Ok(())
            }
        }
    }

    /// Build the full-raster label for a source pair
    pub fn label(&self, before: &Raster, after: &Raster, mask: Option<&Raster>) -> Result<Vec<bool>> {
        match *self {
            MaskStrategy::ExplicitMask => {
                let mask = mask.ok_or_else(|| {
                    SentinelError::Data("explicit mask strategy selected but no mask supplied".into())
                })?;
                if mask.dims() != before.dims() {
                    return Err(SentinelError::Data(format!(
                        "mask is {}x{}, imagery is {}x{}",
                        mask.height(),
                        mask.width(),
                        before.height(),
                        before.width()
                    )));
                }
                Ok(mask.binarized_mask())
            }
            MaskStrategy::NdviProxy {
                nir_band,
                red_band,
                threshold,
            } => {
                self.check_bands(before.bands())?;
                self.check_bands(after.bands())?;
                let ndvi_before = ndvi(before, nir_band, red_band);
                let ndvi_after = ndvi(after, nir_band, red_band);
                Ok(ndvi_before
                    .iter()
                    .zip(ndvi_after.iter())
                    .map(|(b, a)| b - a > threshold)
                    .collect())
            }
            MaskStrategy::RgbDiffProxy {
                rgb_bands,
                threshold,
            } => {
                self.check_bands(before.bands())?;
                self.check_bands(after.bands())?;
                let luma_before = luma(before, rgb_bands);
                let luma_after = luma(after, rgb_bands);
                Ok(luma_before
                    .iter()
                    .zip(luma_after.iter())
                    .map(|(b, a)| (a - b).abs() > threshold)
                    .collect())
            }
        }
    }
}

/// Normalized difference vegetation index per pixel.
/// A zero denominator is replaced by 1.
pub fn ndvi(raster: &Raster, nir_band: usize, red_band: usize) -> Vec<f32> {
    raster
        .band(nir_band)
        .iter()
        .zip(raster.band(red_band).iter())
        .map(|(&nir, &red)| {
            let den = nir + red;
            let den = if den == 0.0 { 1.0 } else { den };
            (nir - red) / den
        })
        .collect()
}

/// ITU-R 601 luma of the given red, green and blue bands, normalized to [0, 1]
pub fn luma(raster: &Raster, [red, green, blue]: [usize; 3]) -> Vec<f32> {
    let divisor = raster.depth().divisor();
    raster
        .band(red)
        .iter()
        .zip(raster.band(green).iter())
        .zip(raster.band(blue).iter())
        .map(|((&r, &g), &b)| (0.299 * r + 0.587 * g + 0.114 * b) / divisor)
        .collect()
}
