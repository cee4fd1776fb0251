//! Chip extraction
//!
//! Splits a before/after raster pair into fixed-size training tiles. Only
//! windows that fit entirely inside the raster are produced; trailing partial
//! tiles are dropped (inference pads them instead, see
//! [`crate::inference::WindowPlan`]).

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::mask::MaskStrategy;
use crate::config::ChipConfig;
use crate::raster::{read_raster, write_mask, write_raster, Raster, TileAddress, TileKind};
use crate::utils::error::{Result, SentinelError};

const BEFORE_MARKER: &str = "_before";

/// A before/after scene pair with an optional ground-truth mask
#[derive(Debug, Clone)]
pub struct SourcePair {
    /// Source name; a trailing `_before` marker is stripped for tile naming
    pub name: String,
    pub before: Raster,
    pub after: Raster,
    pub mask: Option<Raster>,
}

impl SourcePair {
    /// Base name used in tile file names
    pub fn base_name(&self) -> &str {
        self.name.strip_suffix(BEFORE_MARKER).unwrap_or(&self.name)
    }
}

/// One extracted training sample
#[derive(Debug, Clone, PartialEq)]
pub struct ChipSample {
    pub address: TileAddress,
    pub before: Raster,
    pub after: Raster,
    /// Row-major binary change label, tile_size × tile_size
    pub mask: Vec<bool>,
}

/// Outcome of a multi-pair extraction run
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub samples: Vec<ChipSample>,
    /// Source pairs skipped because of a DataError
    pub skipped: Vec<(String, SentinelError)>,
    /// Windows dropped because the before tile was all zero
    pub empty_tiles: usize,
}

/// Top-left origins of every window that fits fully inside `len`
pub fn fitting_origins(len: usize, size: usize, stride: usize) -> Vec<usize> {
    if size == 0 || stride == 0 || len < size {
        return Vec::new();
    }
    (0..=len - size).step_by(stride).collect()
}

pub struct ChipExtractor {
    config: ChipConfig,
}

impl ChipExtractor {
    pub fn new(config: ChipConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChipConfig {
        &self.config
    }

    /// All (y, x) origins for a raster of the given size
    pub fn window_origins(&self, height: usize, width: usize) -> Vec<(usize, usize)> {
        let s = self.config.tile_size;
        let t = self.config.stride;
        let xs = fitting_origins(width, s, t);
        fitting_origins(height, s, t)
            .into_iter()
            .flat_map(|y| xs.iter().map(move |&x| (y, x)))
            .collect()
    }

    /// Extract samples from one source pair, returning them with the number
    /// of all-zero windows that were skipped.
    pub fn extract(&self, pair: &SourcePair) -> Result<(Vec<ChipSample>, usize)> {
        if pair.before.dims() != pair.after.dims() {
            return Err(SentinelError::Data(format!(
                "{}: before is {}x{}, after is {}x{}",
                pair.name,
                pair.before.height(),
                pair.before.width(),
                pair.after.height(),
                pair.after.width()
            )));
        }
        if pair.before.bands() != pair.after.bands() {
            return Err(SentinelError::Data(format!(
                "{}: before has {} bands, after has {}",
                pair.name,
                pair.before.bands(),
                pair.after.bands()
            )));
        }

        let strategy = self.config.mask_strategy;
        let label = strategy
            .label(&pair.before, &pair.after, pair.mask.as_ref())
            .map_err(|e| match e {
                SentinelError::Data(msg) => SentinelError::Data(format!("{}: {}", pair.name, msg)),
                other => other,
            })?;

        let (height, width) = pair.before.dims();
        let s = self.config.tile_size;
        let base = pair.base_name();

        let mut samples = Vec::new();
        let mut empty = 0;
        for (y, x) in self.window_origins(height, width) {
            let before = pair.before.window(y, x, s, s)?;
            if before.is_all_zero() {
                empty += 1;
                continue;
            }
            let after = pair.after.window(y, x, s, s)?;

            let mut mask = Vec::with_capacity(s * s);
            for row in y..y + s {
                mask.extend_from_slice(&label[row * width + x..row * width + x + s]);
            }

            samples.push(ChipSample {
                address: TileAddress::new(base, y, x),
                before,
                after,
                mask,
            });
        }

        debug!(
            "{}: {} tiles kept, {} empty skipped ({})",
            pair.name,
            samples.len(),
            empty,
            strategy.name()
        );
        Ok((samples, empty))
    }

    /// Extract from many pairs. DataErrors skip the offending pair only;
    /// any other error aborts the run.
    pub fn extract_all<'a, I>(&self, pairs: I) -> Result<ExtractionReport>
    where
        I: IntoIterator<Item = &'a SourcePair>,
    {
        let mut report = ExtractionReport::default();
        for pair in pairs {
            match self.extract(pair) {
                Ok((samples, empty)) => {
                    report.samples.extend(samples);
                    report.empty_tiles += empty;
                }
                Err(e) if e.is_skippable() => {
                    warn!("Skipping source pair {}: {}", pair.name, e);
                    report.skipped.push((pair.name.clone(), e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Write samples as `{base}_{y}_{x}_{kind}.{ext}` triplets
    pub fn write_samples(&self, samples: &[ChipSample], out_dir: &Path) -> Result<usize> {
        std::fs::create_dir_all(out_dir)?;
        let ext = &self.config.extension;
        let s = self.config.tile_size;

        for sample in samples {
            let a = &sample.address;
            write_raster(&sample.before, &out_dir.join(a.file_name(TileKind::Before, ext)))?;
            write_raster(&sample.after, &out_dir.join(a.file_name(TileKind::After, ext)))?;
            write_mask(&sample.mask, s, s, &out_dir.join(a.file_name(TileKind::Mask, ext)))?;
        }
        Ok(samples.len())
    }

    /// Find `*_before.*` scenes under `input_dir`, chip each one and write the
    /// tiles into `out_dir`. Unreadable or inconsistent pairs are skipped.
    pub fn extract_directory(&self, input_dir: &Path, out_dir: &Path) -> Result<ExtractionReport> {
        let scenes = find_scene_pairs(input_dir);
        info!("Found {} scene pairs in {}", scenes.len(), input_dir.display());

        let mut report = ExtractionReport::default();
        for scene in scenes {
            let pair = match scene.load(self.config.mask_strategy) {
                Ok(pair) => pair,
                Err(e) if e.is_skippable() => {
                    warn!("Skipping source pair {}: {}", scene.name, e);
                    report.skipped.push((scene.name.clone(), e));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut partial = self.extract_all(std::iter::once(&pair))?;
            self.write_samples(&partial.samples, out_dir)?;
            report.empty_tiles += partial.empty_tiles;
            report.skipped.append(&mut partial.skipped);
            report.samples.append(&mut partial.samples);
        }

        info!(
            "Extracted {} tiles ({} empty skipped, {} pairs skipped)",
            report.samples.len(),
            report.empty_tiles,
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Scene files discovered on disk
#[derive(Debug, Clone)]
pub struct ScenePaths {
    pub name: String,
    pub before: PathBuf,
    pub after: PathBuf,
    pub mask: Option<PathBuf>,
}

impl ScenePaths {
    /// Read the rasters. The mask file is only read for `ExplicitMask`.
    pub fn load(&self, strategy: MaskStrategy) -> Result<SourcePair> {
        let mask = if strategy.is_proxy() {
            None
        } else {
            let path = self.mask.as_ref().ok_or_else(|| {
                SentinelError::Data(format!("{}: no mask file next to the scene", self.name))
            })?;
            Some(read_raster(path)?)
        };

        Ok(SourcePair {
            name: self.name.clone(),
            before: read_raster(&self.before)?,
            after: read_raster(&self.after)?,
            mask,
        })
    }
}

/// Recursively pair `{base}_before.{ext}` with `{base}_after.{ext}` and an
/// optional `{base}_mask.{ext}`. Results are sorted by path.
pub fn find_scene_pairs(input_dir: &Path) -> Vec<ScenePaths> {
    let mut scenes: Vec<ScenePaths> = WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let path = e.path();
            let stem = path.file_stem()?.to_str()?;
            let ext = path.extension()?.to_str()?;
            let base = stem.strip_suffix(BEFORE_MARKER)?;
            let after = path.with_file_name(format!("{}_after.{}", base, ext));
            if !after.is_file() {
                warn!("No after scene for {}", path.display());
                return None;
            }
            let mask = path.with_file_name(format!("{}_mask.{}", base, ext));
            Some(ScenePaths {
                name: base.to_string(),
                before: path.to_path_buf(),
                after,
                mask: mask.is_file().then_some(mask),
            })
        })
        .collect();
    scenes.sort_by(|a, b| a.before.cmp(&b.before));
    scenes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::PixelDepth;
    use tempfile::TempDir;

    fn config(tile: usize, stride: usize, strategy: MaskStrategy) -> ChipConfig {
        ChipConfig {
            tile_size: tile,
            stride,
            mask_strategy: strategy,
            extension: "png".to_string(),
        }
    }

    fn filled(bands: usize, h: usize, w: usize, v: f32) -> Raster {
        Raster::new(bands, h, w, vec![v; bands * h * w], PixelDepth::U8).unwrap()
    }

    #[test]
    fn test_fitting_origins_drop_partial() {
        assert_eq!(fitting_origins(512, 256, 256), vec![0, 256]);
        assert_eq!(fitting_origins(300, 256, 256), vec![0]);
        assert_eq!(fitting_origins(100, 256, 256), Vec::<usize>::new());
        assert_eq!(fitting_origins(10, 4, 3), vec![0, 3, 6]);
    }

    #[test]
    fn test_tiles_have_configured_size() {
        let ex = ChipExtractor::new(config(4, 4, MaskStrategy::rgb_diff())).unwrap();
        let pair = SourcePair {
            name: "scene_before".into(),
            before: filled(3, 10, 9, 50.0),
            after: filled(3, 10, 9, 50.0),
            mask: None,
        };
        let (samples, empty) = ex.extract(&pair).unwrap();
        assert_eq!(empty, 0);
        assert_eq!(samples.len(), 4);
        for s in &samples {
            assert_eq!(s.before.dims(), (4, 4));
            assert_eq!(s.after.dims(), (4, 4));
            assert_eq!(s.mask.len(), 16);
            assert_eq!(s.address.source, "scene");
        }
    }

    #[test]
    fn test_all_zero_before_tile_skipped() {
        let ex = ChipExtractor::new(config(2, 2, MaskStrategy::rgb_diff())).unwrap();
        let mut before = filled(3, 2, 4, 0.0);
        before.set(1, 0, 3, 7.0);
        let pair = SourcePair {
            name: "p".into(),
            before,
            after: filled(3, 2, 4, 0.0),
            mask: None,
        };
        let (samples, empty) = ex.extract(&pair).unwrap();
        assert_eq!(empty, 1);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].address, TileAddress::new("p", 0, 2));
    }

    #[test]
    fn test_dimension_mismatch_skips_pair_only() {
        let ex = ChipExtractor::new(config(2, 2, MaskStrategy::rgb_diff())).unwrap();
        let bad = SourcePair {
            name: "bad".into(),
            before: filled(3, 4, 4, 1.0),
            after: filled(3, 4, 6, 1.0),
            mask: None,
        };
        let good = SourcePair {
            name: "good".into(),
            before: filled(3, 4, 4, 1.0),
            after: filled(3, 4, 4, 1.0),
            mask: None,
        };
        let report = ex.extract_all([&bad, &good]).unwrap();
        assert_eq!(report.samples.len(), 4);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "bad");
        assert!(matches!(report.skipped[0].1, SentinelError::Data(_)));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let ex = ChipExtractor::new(config(3, 2, MaskStrategy::rgb_diff())).unwrap();
        let mut before = filled(3, 9, 9, 0.0);
        let mut after = filled(3, 9, 9, 0.0);
        for y in 0..9 {
            for x in 0..9 {
                let v = ((y * 31 + x * 17) % 7) as f32 * 30.0;
                for b in 0..3 {
                    before.set(b, y, x, v);
                    after.set(b, y, x, 210.0 - v);
                }
            }
        }
        let pair = SourcePair {
            name: "d".into(),
            before,
            after,
            mask: None,
        };
        let first = ex.extract_all([&pair]).unwrap();
        let second = ex.extract_all([&pair]).unwrap();
        assert_eq!(first.samples, second.samples);
        assert_eq!(first.empty_tiles, second.empty_tiles);
    }

    #[test]
    fn test_explicit_mask_is_windowed() {
        let ex = ChipExtractor::new(config(2, 2, MaskStrategy::ExplicitMask)).unwrap();
        let mut gt = filled(1, 4, 4, 0.0);
        gt.set(0, 3, 2, 255.0);
        let pair = SourcePair {
            name: "gt".into(),
            before: filled(3, 4, 4, 9.0),
            after: filled(3, 4, 4, 9.0),
            mask: Some(gt),
        };
        let (samples, _) = ex.extract(&pair).unwrap();
        let hit = samples
            .iter()
            .find(|s| s.address == TileAddress::new("gt", 2, 2))
            .unwrap();
        assert_eq!(hit.mask, vec![false, false, true, false]);
        assert!(samples
            .iter()
            .filter(|s| s.address != hit.address)
            .all(|s| s.mask.iter().all(|&m| !m)));
    }

    #[test]
    fn test_circle_ndvi_scenario() {
        // band 0 = red, band 1 = NIR
        let size = 256;
        let inside = |y: usize, x: usize| {
            let dy = y as f32 - 128.0;
            let dx = x as f32 - 128.0;
            dy * dy + dx * dx < 40.0 * 40.0
        };

        let mut before = Raster::zeros(2, size, size, PixelDepth::Float);
        let mut after = Raster::zeros(2, size, size, PixelDepth::Float);
        for y in 0..size {
            for x in 0..size {
                before.set(0, y, x, 0.1);
                before.set(1, y, x, 0.5);
                after.set(0, y, x, if inside(y, x) { 0.3 } else { 0.1 });
                after.set(1, y, x, 0.5);
            }
        }

        let strategy = MaskStrategy::NdviProxy {
            nir_band: 1,
            red_band: 0,
            threshold: 0.2,
        };
        let ex = ChipExtractor::new(config(size, size, strategy)).unwrap();
        let pair = SourcePair {
            name: "circle".into(),
            before,
            after,
            mask: None,
        };
        let (samples, _) = ex.extract(&pair).unwrap();
        assert_eq!(samples.len(), 1);

        let mask = &samples[0].mask;
        for y in 0..size {
            for x in 0..size {
                assert_eq!(mask[y * size + x], inside(y, x), "pixel ({}, {})", y, x);
            }
        }
    }

    #[test]
    fn test_extract_directory_writes_triplets() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        let mut after = filled(3, 4, 4, 20.0);
        after.set(0, 0, 0, 250.0);
        after.set(1, 0, 0, 250.0);
        after.set(2, 0, 0, 250.0);
        write_raster(&filled(3, 4, 4, 20.0), &input.path().join("site_before.png")).unwrap();
        write_raster(&after, &input.path().join("site_after.png")).unwrap();
        write_raster(&filled(3, 4, 4, 20.0), &input.path().join("orphan_before.png")).unwrap();

        let ex = ChipExtractor::new(config(2, 2, MaskStrategy::rgb_diff())).unwrap();
        let report = ex.extract_directory(input.path(), output.path()).unwrap();
        assert_eq!(report.samples.len(), 4);

        let scan = crate::raster::discover_triplets(output.path()).unwrap();
        assert_eq!(scan.triplets.len(), 4);
        assert!(scan.incomplete.is_empty());

        let first = &scan.triplets[0];
        assert_eq!(first.address, TileAddress::new("site", 0, 0));
        let mask = read_raster(&first.mask).unwrap();
        assert_eq!(mask.binarized_mask(), vec![true, false, false, false]);
    }
}
