//! Residual feature extractor used by the teacher.
//!
//! A ResNet-style backbone: 7x7/2 stem, 3x3/2 max-pool and four stages of basic
//! residual blocks. The total output stride is 32, so a 224x224 image becomes a
//! `[512, 7, 7]` feature map with the default widths.

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};
use tracing::info;

use crate::utils::error::{self, ClassifierError};

/// Configuration of the residual backbone
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Channels produced by the stem convolution
    #[config(default = "64")]
    pub stem_channels: usize,

    /// Output channels of each residual stage
    #[config(default = "vec![64, 128, 256, 512]")]
    pub stage_channels: Vec<usize>,

    /// Number of residual blocks in each stage
    #[config(default = "vec![2, 2, 2, 2]")]
    pub blocks_per_stage: Vec<usize>,
}

impl BackboneConfig {
    /// A narrow variant, handy for quick experiments
    pub fn tiny() -> Self {
        Self::new()
            .with_stem_channels(8)
            .with_stage_channels(vec![8, 16, 32, 64])
            .with_blocks_per_stage(vec![1, 1, 1, 1])
    }

    pub fn validate(&self) -> error::Result<()> {
        if self.stage_channels.is_empty() {
            return Err(ClassifierError::Config(
                "backbone needs at least one residual stage".to_string(),
            ));
        }
        if self.stage_channels.len() != self.blocks_per_stage.len() {
            return Err(ClassifierError::Config(format!(
                "backbone has {} stage widths but {} block counts",
                self.stage_channels.len(),
                self.blocks_per_stage.len()
            )));
        }
        if self.blocks_per_stage.iter().any(|&n| n == 0)
            || self.stage_channels.iter().any(|&c| c == 0)
            || self.stem_channels == 0
        {
            return Err(ClassifierError::Config(
                "backbone widths and block counts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Channels of the emitted feature map
    pub fn feature_channels(&self) -> usize {
        self.stage_channels.last().copied().unwrap_or(self.stem_channels)
    }

    /// Spatial side of the feature map for a square input
    pub fn feature_size(&self, input_size: usize) -> usize {
        // stem conv and max-pool each halve (rounding up), then every stage after the first
        let halve = |s: usize| (s + 1) / 2;
        let mut size = halve(halve(input_size));
        for _ in 1..self.stage_channels.len() {
            size = halve(size);
        }
        size
    }

    /// Build a randomly initialised backbone
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<Backbone<B>> {
        self.validate()?;

        let stem = Conv2dConfig::new([self.in_channels, self.stem_channels], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let stem_bn = BatchNormConfig::new(self.stem_channels).init(device);
        let stem_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let blocks = self
            .block_plan()
            .into_iter()
            .map(|(in_channels, out_channels, stride)| {
                ResidualBlock::new(in_channels, out_channels, stride, device)
            })
            .collect();

        Ok(Backbone {
            stem,
            stem_bn,
            stem_pool,
            blocks,
            relu: Relu::new(),
            feature_channels: self.feature_channels(),
        })
    }

    /// Build the backbone and load pretrained weights from a record file
    pub fn init_pretrained<B: Backend>(
        &self,
        weights: &Path,
        device: &B::Device,
    ) -> error::Result<Backbone<B>> {
        self.init::<B>(device)?.load_pretrained(weights, device)
    }

    /// `(in_channels, out_channels, stride)` of every residual block, in order
    fn block_plan(&self) -> Vec<(usize, usize, usize)> {
        let mut plan = Vec::new();
        let mut in_channels = self.stem_channels;
        for (stage_idx, (&out_channels, &num_blocks)) in self
            .stage_channels
            .iter()
            .zip(self.blocks_per_stage.iter())
            .enumerate()
        {
            for block_idx in 0..num_blocks {
                let stride = if stage_idx > 0 && block_idx == 0 { 2 } else { 1 };
                plan.push((in_channels, out_channels, stride));
                in_channels = out_channels;
            }
        }
        plan
    }

    /// Trainable parameters: bias-free convolutions plus BN scale and shift
    pub fn param_count(&self) -> usize {
        let stem = self.in_channels * self.stem_channels * 49 + 2 * self.stem_channels;

        let blocks: usize = self
            .block_plan()
            .into_iter()
            .map(|(c_in, c_out, stride)| {
                let convs = c_in * c_out * 9 + c_out * c_out * 9 + 4 * c_out;
                let shortcut = if needs_projection(c_in, c_out, stride) {
                    c_in * c_out + 2 * c_out
                } else {
                    0
                };
                convs + shortcut
            })
            .sum();

        stem + blocks
    }

    /// Channels normalised by BatchNorm layers (each keeps running statistics)
    pub fn norm_channels(&self) -> usize {
        let blocks: usize = self
            .block_plan()
            .into_iter()
            .map(|(c_in, c_out, stride)| {
                if needs_projection(c_in, c_out, stride) {
                    3 * c_out
                } else {
                    2 * c_out
                }
            })
            .sum();

        self.stem_channels + blocks
    }
}

fn needs_projection(in_channels: usize, out_channels: usize, stride: usize) -> bool {
    stride != 1 || in_channels != out_channels
}

/// 1x1 projection used when a residual block changes shape
#[derive(Module, Debug)]
pub struct Shortcut<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
}

/// Basic residual block: two 3x3 convolutions with an identity or projected skip
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B>,
    pub shortcut: Option<Shortcut<B>>,
    pub relu: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let bn1 = BatchNormConfig::new(out_channels).init(device);

        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let bn2 = BatchNormConfig::new(out_channels).init(device);

        let shortcut = if needs_projection(in_channels, out_channels, stride) {
            Some(Shortcut {
                conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                    .with_stride([stride, stride])
                    .with_bias(false)
                    .init(device),
                bn: BatchNormConfig::new(out_channels).init(device),
            })
        } else {
            None
        };

        Self {
            conv1,
            bn1,
            conv2,
            bn2,
            shortcut,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.bn.forward(shortcut.conv.forward(x.clone())),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));

        self.relu.forward(out + identity)
    }
}

/// Residual feature extractor
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub stem: Conv2d<B>,
    pub stem_bn: BatchNorm<B>,
    pub stem_pool: MaxPool2d,
    pub blocks: Vec<ResidualBlock<B>>,
    pub relu: Relu,
    feature_channels: usize,
}

impl<B: Backend> Backbone<B> {
    /// Extract a feature map: `[B, C_in, H, W] -> [B, feature_channels, H/32, W/32]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.stem_bn.forward(self.stem.forward(x)));
        let x = self.stem_pool.forward(x);

        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    pub fn feature_channels(&self) -> usize {
        self.feature_channels
    }

    /// Replace every parameter and running statistic with the record at `weights`
    pub fn load_pretrained(self, weights: &Path, device: &B::Device) -> error::Result<Self> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let backbone = self
            .load_file(weights.to_path_buf(), &recorder, device)
            .map_err(|e| ClassifierError::PretrainedWeights {
                path: weights.to_path_buf(),
                reason: format!("{:?}", e),
            })?;

        info!("Loaded pretrained backbone weights from {:?}", weights);
        Ok(backbone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_feature_size_has_stride_32() {
        let config = BackboneConfig::new();
        assert_eq!(config.feature_size(224), 7);
        assert_eq!(config.feature_size(32), 1);
        assert_eq!(config.feature_channels(), 512);
    }

    #[test]
    fn test_tiny_backbone_output_shape() {
        let device = Default::default();
        let config = BackboneConfig::tiny();
        let backbone = config.init::<TestBackend>(&device).unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 64, 64], &device);
        let features = backbone.forward(input);

        assert_eq!(features.dims(), [2, 64, 2, 2]);
        assert_eq!(config.feature_size(64), 2);
    }

    #[test]
    fn test_param_count_matches_module() {
        let device = Default::default();
        let config = BackboneConfig::tiny();
        let backbone = config.init::<TestBackend>(&device).unwrap();

        // stem 1192; blocks (8->8) 1184, (8->16) 3680, (16->32) 14528, (32->64) 57728
        assert_eq!(config.param_count(), 78_312);
        assert_eq!(
            backbone.num_params(),
            config.param_count() + 2 * config.norm_channels()
        );
    }

    #[test]
    fn test_mismatched_stage_lists_rejected() {
        let config = BackboneConfig::new().with_blocks_per_stage(vec![2, 2]);
        assert!(matches!(config.validate(), Err(ClassifierError::Config(_))));
    }

    #[test]
    fn test_pretrained_roundtrip() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backbone");
        let config = BackboneConfig::tiny();

        let original = config.init::<TestBackend>(&device).unwrap();
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        original.clone().save_file(path.clone(), &recorder).unwrap();

        let loaded = config.init_pretrained::<TestBackend>(&path, &device).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected: Vec<f32> = original.forward(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = loaded.forward(input).into_data().to_vec().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_missing_pretrained_weights_reported() {
        let device = Default::default();
        let result = BackboneConfig::tiny()
            .init_pretrained::<TestBackend>(Path::new("/nonexistent/weights"), &device);

        assert!(matches!(
            result,
            Err(ClassifierError::PretrainedWeights { .. })
        ));
    }
}
