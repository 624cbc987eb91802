//! Depthwise-separable convolutional stage
//!
//! One repeating unit of the student network:
//!
//! ```text
//! depthwise 3x3 -> BN -> ReLU -> pointwise 1x1 -> BN -> ReLU -> [maxpool 2x2] -> channel attention
//! ```
//!
//! The depthwise/pointwise factorisation replaces a full `C_in x C_out x 3 x 3`
//! convolution with `C_in x 3 x 3 + C_in x C_out` weights.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::attention::{ChannelAttention, ChannelAttentionConfig};
use crate::utils::error::{self, ClassifierError};

/// Descriptor of one convolutional stage
#[derive(Config, Debug)]
pub struct StageConfig {
    /// Channels entering the stage
    pub in_channels: usize,

    /// Channels produced by the pointwise convolution
    pub out_channels: usize,

    /// Halve the spatial dimensions with a 2x2 max-pool
    #[config(default = "true")]
    pub downsample: bool,

    /// Reduction ratio of the trailing channel attention gate
    #[config(default = "16")]
    pub reduction: usize,
}

impl StageConfig {
    fn attention(&self) -> ChannelAttentionConfig {
        ChannelAttentionConfig::new(self.out_channels).with_reduction(self.reduction)
    }

    /// Check the stage can be built
    pub fn validate(&self) -> error::Result<()> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(ClassifierError::shape(
                "convolutional stage",
                &[self.in_channels, self.out_channels],
                "stage channel counts must be positive",
            ));
        }
        self.attention().validate()
    }

    /// Build the stage
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<ConvStage<B>> {
        self.validate()?;

        // One 3x3 filter per input channel
        let depthwise = Conv2dConfig::new([self.in_channels, self.in_channels], [3, 3])
            .with_groups(self.in_channels)
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let depthwise_bn = BatchNormConfig::new(self.in_channels).init(device);

        let pointwise = Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1])
            .init(device);
        let pointwise_bn = BatchNormConfig::new(self.out_channels).init(device);

        let pool = if self.downsample {
            Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
        } else {
            None
        };

        Ok(ConvStage {
            depthwise,
            depthwise_bn,
            pointwise,
            pointwise_bn,
            relu: Relu::new(),
            pool,
            attention: self.attention().init(device)?,
            out_channels: self.out_channels,
        })
    }

    /// Output `[channels, height, width]` for an input of `height x width`
    pub fn output_shape(&self, height: usize, width: usize) -> [usize; 3] {
        if self.downsample {
            [self.out_channels, height / 2, width / 2]
        } else {
            [self.out_channels, height, width]
        }
    }

    /// Trainable parameters: conv weights and biases, BN scale and shift, gate weights
    pub fn param_count(&self) -> usize {
        let c_in = self.in_channels;
        let c_out = self.out_channels;

        let depthwise = c_in * 9 + c_in;
        let pointwise = c_in * c_out + c_out;
        let norms = 2 * c_in + 2 * c_out;

        depthwise + pointwise + norms + self.attention().param_count()
    }

    /// Channels normalised by the two BatchNorm layers
    ///
    /// Each carries a running mean and variance; `Module::num_params` counts
    /// those too, although the optimizer never updates them.
    pub fn norm_channels(&self) -> usize {
        self.in_channels + self.out_channels
    }
}

/// Depthwise-separable convolution stage with channel attention
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    pub depthwise: Conv2d<B>,
    pub depthwise_bn: BatchNorm<B>,
    pub pointwise: Conv2d<B>,
    pub pointwise_bn: BatchNorm<B>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
    pub attention: ChannelAttention<B>,
    out_channels: usize,
}

impl<B: Backend> ConvStage<B> {
    /// Forward pass: `[B, C_in, H, W] -> [B, C_out, H', W']`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.depthwise.forward(x);
        let x = self.depthwise_bn.forward(x);
        let x = self.relu.forward(x);

        let x = self.pointwise.forward(x);
        let x = self.pointwise_bn.forward(x);
        let x = self.relu.forward(x);

        let x = match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        };

        self.attention.forward(x)
    }

    /// Channels produced by this stage
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_output_channels_follow_config() {
        let device = Default::default();

        for (c_in, c_out) in [(3, 32), (32, 64), (64, 16)] {
            let stage = StageConfig::new(c_in, c_out)
                .init::<TestBackend>(&device)
                .unwrap();
            let input = Tensor::<TestBackend, 4>::random(
                [2, c_in, 8, 8],
                Distribution::Default,
                &device,
            );

            let output = stage.forward(input);
            assert_eq!(output.dims(), [2, c_out, 4, 4]);
            assert_eq!(stage.out_channels(), c_out);
        }
    }

    #[test]
    fn test_without_downsampling_spatial_dims_preserved() {
        let device = Default::default();
        let stage = StageConfig::new(16, 32)
            .with_downsample(false)
            .init::<TestBackend>(&device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([1, 16, 7, 9], &device);
        assert_eq!(stage.forward(input).dims(), [1, 32, 7, 9]);
    }

    #[test]
    fn test_output_shape_helper() {
        let config = StageConfig::new(3, 32);
        assert_eq!(config.output_shape(224, 224), [32, 112, 112]);
        assert_eq!(
            config.with_downsample(false).output_shape(14, 14),
            [32, 14, 14]
        );
    }

    #[test]
    fn test_param_count_matches_module() {
        let device = Default::default();
        let config = StageConfig::new(32, 64);
        let stage = config.init::<TestBackend>(&device).unwrap();

        assert_eq!(config.param_count(), 3136);
        assert_eq!(
            stage.num_params(),
            config.param_count() + 2 * config.norm_channels()
        );
    }

    #[test]
    fn test_separable_cheaper_than_full_convolution() {
        let config = StageConfig::new(128, 256);
        let full_conv = 128 * 256 * 9 + 256;
        assert!(config.param_count() < full_conv);
    }

    #[test]
    fn test_zero_width_gate_rejected() {
        let device = Default::default();
        let result = StageConfig::new(3, 8).init::<TestBackend>(&device);
        assert!(matches!(
            result,
            Err(ClassifierError::ShapeContract { .. })
        ));
    }
}
