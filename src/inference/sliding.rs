//! Sliding-window inference over arbitrarily large raster pairs

use std::fs;
use std::path::Path;
use std::time::Instant;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use tracing::{debug, info};

use crate::config::InferenceConfig;
use crate::dataset::ChannelAdapter;
use crate::inference::window::{Window, WindowPlan};
use crate::model::ChangeModel;
use crate::raster::Raster;
use crate::utils::error::{Result, SentinelError};

/// Per-pixel change probabilities for a whole scene, row-major [H, W]
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeMap {
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl ChangeMap {
    pub fn new(height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != height * width {
            return Err(SentinelError::Inference(format!(
                "change map of {}x{} needs {} values, got {}",
                height,
                width,
                height * width,
                data.len()
            )));
        }
        Ok(Self { height, width, data })
    }

    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            data: vec![0.0; height * width],
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.height, self.width]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, y: usize, x: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Raw little-endian f32 blob, no header
    pub fn write_le_f32(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes: Vec<u8> = self.data.iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn read_le_f32(path: &Path, height: usize, width: usize) -> Result<Self> {
        let bytes = fs::read(path)?;
        if bytes.len() != height * width * 4 {
            return Err(SentinelError::Data(format!(
                "{} holds {} bytes, expected {} for {}x{}",
                path.display(),
                bytes.len(),
                height * width * 4,
                height,
                width
            )));
        }
        let data = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::new(height, width, data)
    }
}

/// Runs a fixed-size change model over a full scene.
///
/// Border windows are zero-padded to the tile size and their output is
/// cropped back to the valid extent. Pixels covered by several windows
/// (stride < tile size) receive the mean of all covering predictions.
#[derive(Debug, Clone)]
pub struct SlidingWindowInferencer {
    tile_size: usize,
    stride: usize,
    adapter: ChannelAdapter,
}

impl SlidingWindowInferencer {
    pub fn new(tile_size: usize, stride: usize, adapter: ChannelAdapter) -> Result<Self> {
        if tile_size == 0 || stride == 0 || stride > tile_size {
            return Err(SentinelError::Configuration(format!(
                "stride must satisfy 0 < stride <= tile_size, got stride {} and tile size {}",
                stride, tile_size
            )));
        }
        Ok(Self {
            tile_size,
            stride,
            adapter,
        })
    }

    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.tile_size, config.stride, config.channel_adapter)
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn plan(&self, height: usize, width: usize) -> Result<WindowPlan> {
        WindowPlan::new(height, width, self.tile_size, self.stride)
    }

    /// Predict a change map with the same [H, W] as the input pair
    pub fn run<B: Backend, M: ChangeModel<B>>(
        &self,
        model: &M,
        before: &Raster,
        after: &Raster,
        device: &B::Device,
    ) -> Result<ChangeMap> {
        self.check_inputs(model, before, after)?;

        let (height, width) = before.dims();
        let plan = self.plan(height, width)?;
        let start = Instant::now();

        let mut sum = vec![0.0f32; height * width];
        debug!(
            "{} windows over {}x{} (overlapping: {})",
            plan.len(),
            height,
            width,
            plan.is_overlapping()
        );

        for (i, window) in plan.windows().iter().enumerate() {
            let probs = self.predict_window(model, before, after, window, device)?;
            for row in 0..window.height {
                let out_start = (window.y + row) * width + window.x;
                let tile_start = row * self.tile_size;
                for col in 0..window.width {
                    sum[out_start + col] += probs[tile_start + col];
                }
            }
            debug!("Window {}/{} at ({}, {})", i + 1, plan.len(), window.y, window.x);
        }

        let data = sum
            .into_iter()
            .zip(plan.coverage())
            .map(|(s, n)| if n > 0 { s / n as f32 } else { 0.0 })
            .collect();

        info!(
            "Inferred {}x{} change map from {} windows in {:.2}s",
            height,
            width,
            plan.len(),
            start.elapsed().as_secs_f64()
        );
        ChangeMap::new(height, width, data)
    }

    fn check_inputs<B: Backend, M: ChangeModel<B>>(
        &self,
        model: &M,
        before: &Raster,
        after: &Raster,
    ) -> Result<()> {
        if model.tile_size() != self.tile_size {
            return Err(SentinelError::Configuration(format!(
                "inference tile size {} does not match model tile size {}",
                self.tile_size,
                model.tile_size()
            )));
        }
        if before.dims() != after.dims() || before.bands() != after.bands() {
            return Err(SentinelError::Data(format!(
                "before is {} bands {}x{}, after is {} bands {}x{}",
                before.bands(),
                before.height(),
                before.width(),
                after.bands(),
                after.height(),
                after.width()
            )));
        }
        if before.bands() != model.in_channels() && self.adapter == ChannelAdapter::Strict {
            return Err(SentinelError::Configuration(format!(
                "rasters have {} bands, model expects {}",
                before.bands(),
                model.in_channels()
            )));
        }
        Ok(())
    }

    /// Probabilities for one padded tile, row-major S×S
    fn predict_window<B: Backend, M: ChangeModel<B>>(
        &self,
        model: &M,
        before: &Raster,
        after: &Raster,
        window: &Window,
        device: &B::Device,
    ) -> Result<Vec<f32>> {
        let s = self.tile_size;
        let channels = model.in_channels();
        let to_tensor = |raster: &Raster| -> Result<Tensor<B, 4>> {
            let (tile, _, _) = raster.padded_window(window.y, window.x, s);
            let values = self
                .adapter
                .adapt(tile.normalized(), tile.bands(), s * s, channels)?;
            Ok(Tensor::from_floats(TensorData::new(values, [1, channels, s, s]), device))
        };

        let probs = model.predict(to_tensor(before)?, to_tensor(after)?)?;
        let dims = probs.dims();
        if dims != [1, 1, s, s] {
            return Err(SentinelError::Inference(format!(
                "model returned shape {:?}, expected [1, 1, {}, {}]",
                dims, s, s
            )));
        }

        probs
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| SentinelError::Inference(format!("cannot read model output: {:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::PixelDepth;
    use burn_ndarray::NdArray;
    use std::cell::{Cell, RefCell};
    use tempfile::TempDir;

    type TestBackend = NdArray;

    /// Echoes band 0 of `before` and records how many nonzero pixels each tile held
    struct EchoModel {
        channels: usize,
        tile_size: usize,
        nonzero: RefCell<Vec<usize>>,
    }

    impl EchoModel {
        fn new(channels: usize, tile_size: usize) -> Self {
            Self {
                channels,
                tile_size,
                nonzero: RefCell::new(Vec::new()),
            }
        }
    }

    impl<B: Backend> ChangeModel<B> for EchoModel {
        fn in_channels(&self) -> usize {
            self.channels
        }

        fn tile_size(&self) -> usize {
            self.tile_size
        }

        fn predict(&self, before: Tensor<B, 4>, _after: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
            let [n, _, h, w] = before.dims();
            let band = before.slice([0..n, 0..1, 0..h, 0..w]);
            let values = band.clone().into_data().convert::<f32>().to_vec::<f32>().unwrap();
            self.nonzero
                .borrow_mut()
                .push(values.iter().filter(|&&v| v != 0.0).count());
            Ok(band)
        }
    }

    /// Emits a constant tile whose value is the call index divided by ten
    struct CountingModel {
        calls: Cell<usize>,
    }

    impl<B: Backend> ChangeModel<B> for CountingModel {
        fn in_channels(&self) -> usize {
            1
        }

        fn tile_size(&self) -> usize {
            4
        }

        fn predict(&self, before: Tensor<B, 4>, _after: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
            let k = self.calls.get();
            self.calls.set(k + 1);
            let [n, _, h, w] = before.dims();
            Ok(Tensor::zeros([n, 1, h, w], &before.device()).add_scalar(k as f32 / 10.0))
        }
    }

    fn ones(bands: usize, h: usize, w: usize) -> Raster {
        Raster::new(bands, h, w, vec![255.0; bands * h * w], PixelDepth::U8).unwrap()
    }

    #[test]
    fn test_exact_multiple_uses_four_unpadded_windows() {
        let model = EchoModel::new(3, 256);
        let inferencer = SlidingWindowInferencer::new(256, 256, ChannelAdapter::Strict).unwrap();
        let raster = ones(3, 512, 512);

        let map = inferencer
            .run::<TestBackend, _>(&model, &raster, &raster, &Default::default())
            .unwrap();

        assert_eq!(map.shape(), [512, 512]);
        assert_eq!(*model.nonzero.borrow(), vec![256 * 256; 4]);
        assert!(map.data().iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_border_windows_are_padded_and_cropped() {
        let model = EchoModel::new(3, 256);
        let inferencer = SlidingWindowInferencer::new(256, 256, ChannelAdapter::Strict).unwrap();
        let raster = ones(3, 300, 300);

        let map = inferencer
            .run::<TestBackend, _>(&model, &raster, &raster, &Default::default())
            .unwrap();

        assert_eq!(map.shape(), [300, 300]);
        // Windows are (0,0), (0,256), (256,0), (256,256); padding rows/cols are zero
        assert_eq!(
            *model.nonzero.borrow(),
            vec![256 * 256, 256 * 44, 44 * 256, 44 * 44]
        );
        assert!(map.data().iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_overlapping_windows_are_averaged() {
        let model = CountingModel { calls: Cell::new(0) };
        let inferencer = SlidingWindowInferencer::new(4, 2, ChannelAdapter::Strict).unwrap();
        let raster = ones(1, 4, 6);

        let map = inferencer
            .run::<TestBackend, _>(&model, &raster, &raster, &Default::default())
            .unwrap();

        // Windows in order: (0,0) (0,2) (0,4) (2,0) (2,2) (2,4) -> 0.0 .. 0.5
        assert_eq!(model.calls.get(), 6);
        assert!((map.get(0, 0) - 0.0).abs() < 1e-6);
        assert!((map.get(0, 2) - 0.05).abs() < 1e-6);
        assert!((map.get(2, 2) - 0.2).abs() < 1e-6);
        // Last-write would give 0.5 here
        assert!((map.get(3, 5) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_channel_mismatch_strict_vs_repeat() {
        let raster = ones(3, 8, 8);
        let model = EchoModel::new(6, 8);

        let strict = SlidingWindowInferencer::new(8, 8, ChannelAdapter::Strict).unwrap();
        let err = strict
            .run::<TestBackend, _>(&model, &raster, &raster, &Default::default())
            .unwrap_err();
        assert!(matches!(err, SentinelError::Configuration(_)));
        assert!(model.nonzero.borrow().is_empty());

        let repeat = SlidingWindowInferencer::new(8, 8, ChannelAdapter::RepeatBlock).unwrap();
        let map = repeat
            .run::<TestBackend, _>(&model, &raster, &raster, &Default::default())
            .unwrap();
        assert_eq!(map.shape(), [8, 8]);
    }

    #[test]
    fn test_dimension_mismatch_is_data_error() {
        let model = EchoModel::new(3, 8);
        let inferencer = SlidingWindowInferencer::new(8, 8, ChannelAdapter::Strict).unwrap();
        let err = inferencer
            .run::<TestBackend, _>(&model, &ones(3, 8, 8), &ones(3, 16, 8), &Default::default())
            .unwrap_err();
        assert!(matches!(err, SentinelError::Data(_)));
    }

    #[test]
    fn test_change_map_blob() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/map.f32");
        let map = ChangeMap::new(2, 3, vec![0.0, 0.25, 0.5, 0.75, 1.0, 0.125]).unwrap();
        map.write_le_f32(&path).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), 24);
        assert_eq!(ChangeMap::read_le_f32(&path, 2, 3).unwrap(), map);
        assert!(ChangeMap::read_le_f32(&path, 3, 3).is_err());
    }
}
