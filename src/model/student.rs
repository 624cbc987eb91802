//! Compact student network
//!
//! The student is assembled from an explicit list of stage descriptors that is
//! folded left-to-right over the input tensor:
//!
//! ```text
//! input [B, 3, 224, 224]
//!   stage(3 -> 32, pool)    -> [B, 32, 112, 112]
//!   stage(32 -> 64, pool)   -> [B, 64, 56, 56]
//!   stage(64 -> 128, pool)  -> [B, 128, 28, 28]
//!   stage(128 -> 256, pool) -> [B, 256, 14, 14]
//!   stage(256 -> 512)       -> [B, 512, 14, 14]
//!   global average pool     -> [B, 512]
//!   dense 512 + ReLU, dropout 0.35
//!   dense num_classes (softmax at prediction time)
//! ```

use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::stage::{ConvStage, StageConfig};
use super::ImageClassifier;
use crate::utils::error::{self, ClassifierError};

/// Configuration for the [`StudentNet`]
#[derive(Config, Debug)]
pub struct StudentNetConfig {
    /// Number of output classes
    #[config(default = "2")]
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "224")]
    pub input_size: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Output width of each convolutional stage
    #[config(default = "vec![32, 64, 128, 256, 512]")]
    pub stage_widths: Vec<usize>,

    /// Channel attention reduction ratio used by every stage
    #[config(default = "16")]
    pub reduction: usize,

    /// Units of the fully connected layer before the classifier
    #[config(default = "512")]
    pub dense_units: usize,

    /// Dropout probability applied after the dense layer
    #[config(default = "0.35")]
    pub dropout: f64,
}

impl StudentNetConfig {
    /// Stage descriptors in execution order; every stage but the last downsamples
    pub fn stage_plan(&self) -> Vec<StageConfig> {
        let last = self.stage_widths.len().saturating_sub(1);
        let mut in_channels = self.in_channels;

        self.stage_widths
            .iter()
            .enumerate()
            .map(|(idx, &width)| {
                let stage = StageConfig::new(in_channels, width)
                    .with_downsample(idx < last)
                    .with_reduction(self.reduction);
                in_channels = width;
                stage
            })
            .collect()
    }

    /// Shape `[channels, height, width]` entering the global pool
    pub fn feature_shape(&self) -> [usize; 3] {
        self.stage_plan().iter().fold(
            [self.in_channels, self.input_size, self.input_size],
            |[_, h, w], stage| stage.output_shape(h, w),
        )
    }

    /// Validate the configuration before building
    pub fn validate(&self) -> error::Result<()> {
        if self.num_classes == 0 {
            return Err(ClassifierError::Config(
                "num_classes must be greater than 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ClassifierError::Config(format!(
                "dropout must be in range [0.0, 1.0), got {}",
                self.dropout
            )));
        }
        if self.stage_widths.is_empty() {
            return Err(ClassifierError::Config(
                "student needs at least one convolutional stage".to_string(),
            ));
        }
        if self.dense_units == 0 {
            return Err(ClassifierError::Config(
                "dense_units must be greater than 0".to_string(),
            ));
        }

        let [_, height, width] = self.feature_shape();
        if height == 0 || width == 0 {
            return Err(ClassifierError::shape(
                "student network",
                &[self.in_channels, self.input_size, self.input_size],
                format!(
                    "input is too small for {} downsampling stages",
                    self.stage_widths.len() - 1
                ),
            ));
        }

        self.stage_plan().iter().try_for_each(StageConfig::validate)
    }

    /// Build the student network
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<StudentNet<B>> {
        self.validate()?;

        let stages = self
            .stage_plan()
            .iter()
            .map(|stage| stage.init(device))
            .collect::<error::Result<Vec<_>>>()?;

        let feature_channels = self.feature_shape()[0];

        Ok(StudentNet {
            stages,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(feature_channels, self.dense_units).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            classifier: LinearConfig::new(self.dense_units, self.num_classes).init(device),
            num_classes: self.num_classes,
        })
    }

    /// Trainable parameter count of the network this config builds
    pub fn expected_param_count(&self) -> usize {
        let stages: usize = self.stage_plan().iter().map(StageConfig::param_count).sum();
        let feature_channels = self.feature_shape()[0];

        let fc = feature_channels * self.dense_units + self.dense_units;
        let classifier = self.dense_units * self.num_classes + self.num_classes;

        stages + fc + classifier
    }

    /// BatchNorm channels across all stages (running statistics, not trained)
    pub fn norm_channels(&self) -> usize {
        self.stage_plan().iter().map(StageConfig::norm_channels).sum()
    }
}

/// Compact classifier built from depthwise-separable stages with channel attention
#[derive(Module, Debug)]
pub struct StudentNet<B: Backend> {
    pub stages: Vec<ConvStage<B>>,
    pub global_pool: AdaptiveAvgPool2d,
    pub fc: Linear<B>,
    pub relu: Relu,
    pub dropout: Dropout,
    pub classifier: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> StudentNet<B> {
    /// Forward pass returning logits `[batch_size, num_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stages.iter().fold(x, |x, stage| stage.forward(x));

        // Global pooling: [B, C, H, W] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc.forward(x);
        let x = self.relu.forward(x);
        let x = self.dropout.forward(x);
        self.classifier.forward(x)
    }

    /// Forward pass with softmax: class probabilities summing to one
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl<B: Backend> ImageClassifier<B> for StudentNet<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
