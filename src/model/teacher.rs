//! Teacher network: residual backbone plus a small classification head
//!
//! ```text
//! input [B, 3, 224, 224]
//!   residual backbone       -> [B, 512, 7, 7]
//!   global average pool     -> [B, 512]
//!   dense 128 + ReLU
//!   dense num_classes (softmax at prediction time)
//! ```
//!
//! The backbone is initialised from a Burn record file when one is configured.
//! Nothing is frozen: the whole network is fine-tuned.

use std::path::PathBuf;

use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use tracing::{debug, warn};

use super::backbone::{Backbone, BackboneConfig};
use super::ImageClassifier;
use crate::utils::error::{self, ClassifierError};

/// Configuration for the [`TeacherNet`]
#[derive(Config, Debug)]
pub struct TeacherNetConfig {
    /// Number of output classes
    #[config(default = "2")]
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "224")]
    pub input_size: usize,

    /// Feature extractor layout
    #[config(default = "BackboneConfig::new()")]
    pub backbone: BackboneConfig,

    /// Channels the head expects from the feature extractor
    #[config(default = "512")]
    pub feature_channels: usize,

    /// Units of the hidden dense layer
    #[config(default = "128")]
    pub head_units: usize,

    /// Burn record file holding pretrained backbone weights
    pub pretrained_weights: Option<PathBuf>,
}

impl TeacherNetConfig {
    pub fn validate(&self) -> error::Result<()> {
        self.validate_layout()?;
        if let Some(path) = &self.pretrained_weights {
            if !path.with_extension("mpk").exists() && !path.exists() {
                return Err(ClassifierError::PretrainedWeights {
                    path: path.clone(),
                    reason: "file does not exist".to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate_layout(&self) -> error::Result<()> {
        if self.num_classes == 0 {
            return Err(ClassifierError::Config(
                "num_classes must be greater than 0".to_string(),
            ));
        }
        if self.head_units == 0 {
            return Err(ClassifierError::Config(
                "head_units must be greater than 0".to_string(),
            ));
        }
        self.backbone.validate()
    }

    /// Build the teacher, loading pretrained backbone weights when configured
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<TeacherNet<B>> {
        self.validate()?;

        // Shape check runs before loading: an autodiff forward pass updates the
        // BatchNorm running statistics, and the loaded record replaces them
        let backbone = self.backbone.init::<B>(device)?;
        self.probe(&backbone, device)?;

        let backbone = match &self.pretrained_weights {
            Some(path) => backbone.load_pretrained(path, device)?,
            None => {
                warn!("No pretrained weights configured, teacher backbone starts from random init");
                backbone
            }
        };

        Ok(self.assemble(backbone, device))
    }

    /// Build with a random backbone whose parameters are overwritten right after
    pub(crate) fn init_for_restore<B: Backend>(&self, device: &B::Device) -> error::Result<TeacherNet<B>> {
        self.validate_layout()?;
        let backbone = self.backbone.init::<B>(device)?;
        self.probe(&backbone, device)?;
        Ok(self.assemble(backbone, device))
    }

    fn assemble<B: Backend>(&self, backbone: Backbone<B>, device: &B::Device) -> TeacherNet<B> {
        TeacherNet {
            backbone,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(self.feature_channels, self.head_units).init(device),
            relu: Relu::new(),
            classifier: LinearConfig::new(self.head_units, self.num_classes).init(device),
            num_classes: self.num_classes,
        }
    }

    /// Run a zero image through the extractor and check the feature map shape
    fn probe<B: Backend>(&self, backbone: &Backbone<B>, device: &B::Device) -> error::Result<()> {
        let probe = Tensor::<B, 4>::zeros(
            [1, self.backbone.in_channels, self.input_size, self.input_size],
            device,
        );
        let [_, channels, height, width] = backbone.forward(probe).dims();
        debug!("Teacher backbone probe: [{}, {}, {}]", channels, height, width);

        let expected_size = self.backbone.feature_size(self.input_size);
        if channels != self.feature_channels || height != expected_size || width != expected_size {
            return Err(ClassifierError::shape(
                "teacher backbone",
                &[channels, height, width],
                format!(
                    "expected feature map [{}, {}, {}]",
                    self.feature_channels, expected_size, expected_size
                ),
            ));
        }
        Ok(())
    }

    /// Trainable parameters of the head alone
    pub fn head_param_count(&self) -> usize {
        self.feature_channels * self.head_units
            + self.head_units
            + self.head_units * self.num_classes
            + self.num_classes
    }

    /// Trainable parameter count of the whole teacher
    pub fn expected_param_count(&self) -> usize {
        self.backbone.param_count() + self.head_param_count()
    }
}

/// Large reference classifier
#[derive(Module, Debug)]
pub struct TeacherNet<B: Backend> {
    pub backbone: Backbone<B>,
    pub global_pool: AdaptiveAvgPool2d,
    pub head: Linear<B>,
    pub relu: Relu,
    pub classifier: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> TeacherNet<B> {
    /// Forward pass returning logits `[batch_size, num_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.backbone.forward(x);

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.relu.forward(self.head.forward(x));
        self.classifier.forward(x)
    }

    /// Class probabilities
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl<B: Backend> ImageClassifier<B> for TeacherNet<B> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
