//! Channel Attention Gate
//!
//! Squeeze-reduce-expand-rescale block: the spatial dimensions of a feature map
//! are averaged into one descriptor per channel, squeezed through a bottleneck of
//! `channels / reduction` units and expanded back to one sigmoid weight per
//! channel, which then rescales the input.

use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

use crate::utils::error::{self, ClassifierError};

/// Default reduction ratio of the attention bottleneck
pub const DEFAULT_REDUCTION: usize = 16;

/// Configuration for a [`ChannelAttention`] gate
#[derive(Config, Debug)]
pub struct ChannelAttentionConfig {
    /// Number of channels of the gated feature map
    pub channels: usize,

    /// Reduction ratio `r`; the bottleneck has `channels / r` units
    #[config(default = "16")]
    pub reduction: usize,
}

impl ChannelAttentionConfig {
    /// Width of the bottleneck layer (floored)
    pub fn hidden_units(&self) -> usize {
        if self.reduction == 0 {
            0
        } else {
            self.channels / self.reduction
        }
    }

    /// Check that the gate can be built with a non-empty bottleneck
    pub fn validate(&self) -> error::Result<()> {
        if self.reduction == 0 {
            return Err(ClassifierError::Config(
                "attention reduction ratio must be at least 1".to_string(),
            ));
        }
        if self.channels == 0 || self.hidden_units() == 0 {
            return Err(ClassifierError::shape(
                "channel attention",
                &[self.channels],
                format!(
                    "{} channels with reduction ratio {} leave a zero-width bottleneck",
                    self.channels, self.reduction
                ),
            ));
        }
        Ok(())
    }

    /// Build the gate
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<ChannelAttention<B>> {
        self.validate()?;
        let hidden = self.hidden_units();

        Ok(ChannelAttention {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: LinearConfig::new(self.channels, hidden)
                .with_bias(false)
                .init(device),
            expand: LinearConfig::new(hidden, self.channels)
                .with_bias(false)
                .init(device),
            relu: Relu::new(),
            channels: self.channels,
        })
    }

    /// Number of trainable parameters of the gate
    pub fn param_count(&self) -> usize {
        2 * self.channels * self.hidden_units()
    }
}

/// Channel attention gate over `[batch, channels, height, width]` tensors
#[derive(Module, Debug)]
pub struct ChannelAttention<B: Backend> {
    pool: AdaptiveAvgPool2d,
    reduce: Linear<B>,
    expand: Linear<B>,
    relu: Relu,
    channels: usize,
}

impl<B: Backend> ChannelAttention<B> {
    /// Per-sample, per-channel gating weights of shape `[batch, channels]`
    pub fn gate_weights(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, channels, _, _] = x.dims();

        // Squeeze: [B, C, H, W] -> [B, C]
        let descriptor = self.pool.forward(x).reshape([batch_size, channels]);

        let hidden = self.relu.forward(self.reduce.forward(descriptor));
        sigmoid(self.expand.forward(hidden))
    }

    /// Rescale every channel of `x` by its gating weight
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch_size, channels, _, _] = x.dims();
        let weights = self
            .gate_weights(x.clone())
            .reshape([batch_size, channels, 1, 1]);

        x * weights
    }

    /// Number of gated channels
    pub fn channels(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::module::Module;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_output_shape_matches_input() {
        let device = Default::default();
        let gate = ChannelAttentionConfig::new(32)
            .init::<TestBackend>(&device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::random(
            [2, 32, 7, 5],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output = gate.forward(input);

        assert_eq!(output.dims(), [2, 32, 7, 5]);
    }

    #[test]
    fn test_gate_weights_in_unit_interval() {
        let device = Default::default();
        let gate = ChannelAttentionConfig::new(64)
            .with_reduction(16)
            .init::<TestBackend>(&device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::random(
            [3, 64, 4, 4],
            Distribution::Normal(0.0, 5.0),
            &device,
        );
        let weights = gate.gate_weights(input);
        assert_eq!(weights.dims(), [3, 64]);

        let values: Vec<f32> = weights.into_data().to_vec().unwrap();
        assert!(values.iter().all(|&w| w > 0.0 && w <= 1.0));
    }

    #[test]
    fn test_forward_scales_each_channel() {
        let device = Default::default();
        let gate = ChannelAttentionConfig::new(16)
            .with_reduction(4)
            .init::<TestBackend>(&device)
            .unwrap();

        // A constant input has the weights themselves as output
        let input = Tensor::<TestBackend, 4>::ones([1, 16, 3, 3], &device);
        let weights: Vec<f32> = gate.gate_weights(input.clone()).into_data().to_vec().unwrap();
        let output: Vec<f32> = gate.forward(input).into_data().to_vec().unwrap();

        for (channel, weight) in weights.iter().enumerate() {
            for &value in &output[channel * 9..(channel + 1) * 9] {
                assert!((value - weight).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_floored_reduction_width() {
        let config = ChannelAttentionConfig::new(40).with_reduction(16);
        assert_eq!(config.hidden_units(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_param_count_matches_module() {
        let device = Default::default();
        let config = ChannelAttentionConfig::new(128);
        let gate = config.init::<TestBackend>(&device).unwrap();

        assert_eq!(gate.num_params(), config.param_count());
        assert_eq!(config.param_count(), 2 * 128 * 8);
    }

    #[test]
    fn test_reduction_larger_than_channels_rejected() {
        let device = Default::default();
        let result = ChannelAttentionConfig::new(32)
            .with_reduction(64)
            .init::<TestBackend>(&device);

        match result {
            Err(ClassifierError::ShapeContract { shape, .. }) => assert_eq!(shape, vec![32]),
            other => panic!("expected shape contract error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_zero_reduction_rejected() {
        let config = ChannelAttentionConfig::new(32).with_reduction(0);
        assert!(matches!(config.validate(), Err(ClassifierError::Config(_))));
    }
}
