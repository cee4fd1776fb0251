//! Siamese change-detection network
//!
//! A single encoder is applied to the before tile and to the after tile.
//! The two feature maps are concatenated along channels and decoded back to
//! a one-channel change logit map at the input resolution.
//!
//! ```text
//!  before ─┐                        ┌─ [B, D, S/2^L, S/2^L]
//!          ├─ shared encoder (L↓) ──┤                       ├─ cat ─ decoder (L↑) ─ 1x1 ─ sigmoid
//!  after  ─┘                        └─ [B, D, S/2^L, S/2^L]
//! ```
//!
//! With `D = base_filters · 2^L`, every decoder stage halves the channel depth,
//! so the head sees `2 · base_filters` channels.

use burn::{
    config::Config,
    module::{Module, ModuleVisitor, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

use super::{ArchitectureTag, ChangeModel};
use crate::utils::error::{Result as SentinelResult, SentinelError};

/// Configuration for the SiameseChangeNet model
#[derive(Config, Debug)]
pub struct SiameseChangeNetConfig {
    /// Channels of each input tile
    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters of the first encoder stage
    #[config(default = "16")]
    pub base_filters: usize,

    /// Number of downsampling stages L
    #[config(default = "3")]
    pub encoder_depth: usize,

    /// Tile edge length S the network is trained on
    #[config(default = "256")]
    pub tile_size: usize,
}

impl Default for SiameseChangeNetConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SiameseChangeNetConfig {
    pub fn validate(&self) -> SentinelResult<()> {
        if self.in_channels == 0 {
            return Err(SentinelError::Configuration("in_channels must be > 0".into()));
        }
        if self.base_filters == 0 {
            return Err(SentinelError::Configuration("base_filters must be > 0".into()));
        }
        if self.encoder_depth == 0 || self.encoder_depth > 8 {
            return Err(SentinelError::Configuration(format!(
                "encoder_depth must be in 1..=8, got {}",
                self.encoder_depth
            )));
        }
        let factor = 1usize << self.encoder_depth;
        if self.tile_size == 0 || self.tile_size % factor != 0 {
            return Err(SentinelError::Configuration(format!(
                "tile_size {} must be a positive multiple of 2^{} = {}",
                self.tile_size, self.encoder_depth, factor
            )));
        }
        Ok(())
    }

    /// Encoder output depth D
    pub fn feature_depth(&self) -> usize {
        self.base_filters << self.encoder_depth
    }

    pub fn architecture(&self) -> ArchitectureTag {
        ArchitectureTag {
            in_channels: self.in_channels,
            encoder_depth: self.encoder_depth,
            base_filters: self.base_filters,
            tile_size: self.tile_size,
        }
    }

    /// Initialize a model with fresh weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> SentinelResult<SiameseChangeNet<B>> {
        self.validate()?;
        Ok(SiameseChangeNet::new(self, device))
    }
}

/// Two 3x3 convolutions, each followed by BatchNorm and ReLU
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B>,
    pub relu: Relu,
}

impl<B: Backend> DoubleConv<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = |i: usize| -> Conv2d<B> {
            Conv2dConfig::new([i, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };

        Self {
            conv1: conv(in_channels),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv(out_channels),
            bn2: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        self.relu.forward(self.bn2.forward(self.conv2.forward(x)))
    }
}

/// Shared encoder: stem followed by L pool + DoubleConv stages
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub stem: DoubleConv<B>,
    pub downs: Vec<DoubleConv<B>>,
    pub pool: MaxPool2d,
}

impl<B: Backend> Encoder<B> {
    pub fn new(config: &SiameseChangeNetConfig, device: &B::Device) -> Self {
        let base = config.base_filters;
        let downs = (0..config.encoder_depth)
            .map(|i| DoubleConv::new(base << i, base << (i + 1), device))
            .collect();

        Self {
            stem: DoubleConv::new(config.in_channels, base, device),
            downs,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    /// [B, C, S, S] -> [B, D, S/2^L, S/2^L]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.downs
            .iter()
            .fold(self.stem.forward(x), |x, stage| stage.forward(self.pool.forward(x)))
    }
}

/// Transposed-conv upsampling followed by a DoubleConv, halving channels
#[derive(Module, Debug)]
pub struct UpStage<B: Backend> {
    pub up: ConvTranspose2d<B>,
    pub conv: DoubleConv<B>,
}

impl<B: Backend> UpStage<B> {
    pub fn new(in_channels: usize, device: &B::Device) -> Self {
        let out = in_channels / 2;
        Self {
            up: ConvTranspose2dConfig::new([in_channels, out], [2, 2])
                .with_stride([2, 2])
                .init(device),
            conv: DoubleConv::new(out, out, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.up.forward(x))
    }
}

/// Siamese change-detection network
#[derive(Module, Debug)]
pub struct SiameseChangeNet<B: Backend> {
    pub encoder: Encoder<B>,
    pub decoder: Vec<UpStage<B>>,
    pub head: Conv2d<B>,

    in_channels: usize,
    base_filters: usize,
    encoder_depth: usize,
    tile_size: usize,
}

impl<B: Backend> SiameseChangeNet<B> {
    /// Build from a configuration; call [`SiameseChangeNetConfig::init`] to
    /// validate first.
    pub fn new(config: &SiameseChangeNetConfig, device: &B::Device) -> Self {
        let fused = 2 * config.feature_depth();
        let decoder = (0..config.encoder_depth)
            .map(|i| UpStage::new(fused >> i, device))
            .collect();
        let head_in = fused >> config.encoder_depth;

        Self {
            encoder: Encoder::new(config, device),
            decoder,
            head: Conv2dConfig::new([head_in, 1], [1, 1]).init(device),
            in_channels: config.in_channels,
            base_filters: config.base_filters,
            encoder_depth: config.encoder_depth,
            tile_size: config.tile_size,
        }
    }

    pub fn architecture(&self) -> ArchitectureTag {
        ArchitectureTag {
            in_channels: self.in_channels,
            encoder_depth: self.encoder_depth,
            base_filters: self.base_filters,
            tile_size: self.tile_size,
        }
    }

    fn check_inputs(&self, before: &Tensor<B, 4>, after: &Tensor<B, 4>) -> SentinelResult<()> {
        let [_, cb, hb, wb] = before.dims();
        let [_, ca, _, _] = after.dims();
        if cb != self.in_channels || ca != self.in_channels {
            return Err(SentinelError::Configuration(format!(
                "network expects {} input channels, got before={} after={}",
                self.in_channels, cb, ca
            )));
        }
        if before.dims() != after.dims() {
            return Err(SentinelError::Configuration(format!(
                "before {:?} and after {:?} tiles differ in shape",
                before.dims(),
                after.dims()
            )));
        }
        let factor = 1usize << self.encoder_depth;
        if hb % factor != 0 || wb % factor != 0 {
            return Err(SentinelError::Configuration(format!(
                "tile {}x{} is not divisible by 2^{}",
                hb, wb, self.encoder_depth
            )));
        }
        Ok(())
    }

    /// Change logits of shape [B, 1, H, W]
    pub fn forward_logits(&self, before: Tensor<B, 4>, after: Tensor<B, 4>) -> SentinelResult<Tensor<B, 4>> {
        self.check_inputs(&before, &after)?;

        let f_before = self.encoder.forward(before);
        let f_after = self.encoder.forward(after);
        let fused = Tensor::cat(vec![f_before, f_after], 1);

        let x = self.decoder.iter().fold(fused, |x, stage| stage.forward(x));
        Ok(self.head.forward(x))
    }

    /// Per-pixel change probability in [0, 1], shape [B, 1, H, W]
    pub fn forward(&self, before: Tensor<B, 4>, after: Tensor<B, 4>) -> SentinelResult<Tensor<B, 4>> {
        self.forward_logits(before, after).map(sigmoid)
    }

    fn config(&self) -> SiameseChangeNetConfig {
        SiameseChangeNetConfig::new()
            .with_in_channels(self.in_channels)
            .with_base_filters(self.base_filters)
            .with_encoder_depth(self.encoder_depth)
            .with_tile_size(self.tile_size)
    }

    /// Dotted path and dimensions of every float parameter, in visit order
    pub fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut collector = ShapeCollector::default();
        self.visit(&mut collector);
        collector.shapes
    }

    /// Verify that loaded weights have the shapes this architecture needs.
    ///
    /// Every parameter is compared against a freshly initialized network of
    /// the same architecture, so a checkpoint from a wider or narrower model
    /// is rejected even when the stage count matches.
    pub fn validate_shapes(&self) -> SentinelResult<()> {
        if self.encoder.downs.len() != self.encoder_depth || self.decoder.len() != self.encoder_depth {
            return Err(SentinelError::ModelLoad(format!(
                "expected {} encoder and decoder stages, found {} and {}",
                self.encoder_depth,
                self.encoder.downs.len(),
                self.decoder.len()
            )));
        }

        let device = self.head.weight.val().device();
        let reference = SiameseChangeNet::<B>::new(&self.config(), &device).parameter_shapes();
        let actual = self.parameter_shapes();
        if actual.len() != reference.len() {
            return Err(SentinelError::ModelLoad(format!(
                "checkpoint has {} parameters, architecture needs {}",
                actual.len(),
                reference.len()
            )));
        }
        for ((path, dims), (_, expected)) in actual.iter().zip(&reference) {
            if dims != expected {
                return Err(SentinelError::ModelLoad(format!(
                    "parameter {} has shape {:?}, expected {:?}",
                    path, dims, expected
                )));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct ShapeCollector {
    path: Vec<String>,
    shapes: Vec<(String, Vec<usize>)>,
}

impl<B: Backend> ModuleVisitor<B> for ShapeCollector {
    fn enter_module(&mut self, name: &str, _container_type: &str) {
        self.path.push(name.to_string());
    }

    fn exit_module(&mut self, _name: &str, _container_type: &str) {
        self.path.pop();
    }

    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        self.shapes.push((self.path.join("."), param.lazy_shape().dims));
    }
}

impl<B: Backend> ChangeModel<B> for SiameseChangeNet<B> {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn tile_size(&self) -> usize {
        self.tile_size
    }

    fn predict(&self, before: Tensor<B, 4>, after: Tensor<B, 4>) -> SentinelResult<Tensor<B, 4>> {
        self.forward(before, after)
    }
}
