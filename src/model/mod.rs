//! Model module: network builders and model persistence using the Burn framework
//!
//! This module provides:
//! - The channel attention gate and the depthwise-separable stage it completes
//! - The compact student network assembled from a stage plan
//! - The residual teacher network with an optional pretrained backbone
//! - Artifact save/load (JSON architecture + MessagePack parameters)

pub mod artifact;
pub mod attention;
pub mod backbone;
pub mod stage;
pub mod student;
pub mod teacher;

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

// Re-export main types for convenience
pub use artifact::{load_artifact, save_artifact, ArchitectureConfig};
pub use attention::{ChannelAttention, ChannelAttentionConfig};
pub use stage::{ConvStage, StageConfig};
pub use student::{StudentNet, StudentNetConfig};
pub use teacher::{TeacherNet, TeacherNetConfig};

/// Default number of classes (binary task)
pub const DEFAULT_NUM_CLASSES: usize = 2;

/// Bytes per parameter for the footprint estimate (f32)
pub const BYTES_PER_PARAM: usize = 4;

/// A network mapping an image batch to class logits
///
/// Both the teacher and the student implement this so the training engine can
/// drive them through the same fit and evaluate loops.
pub trait ImageClassifier<B: Backend> {
    /// Logits `[batch_size, num_classes]` for images `[batch_size, 3, H, W]`
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    fn num_classes(&self) -> usize;
}

/// Trainable-parameter statistics of a network
///
/// Counts only what the optimizer updates. `Module::num_params` is not used
/// here because it also includes BatchNorm running statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub total_params: usize,
    pub size_mb: f64,
}

impl ModelSummary {
    pub fn from_params(total_params: usize) -> Self {
        Self {
            total_params,
            size_mb: (total_params * BYTES_PER_PARAM) as f64 / (1024.0 * 1024.0),
        }
    }

    pub fn of_student(config: &StudentNetConfig) -> Self {
        Self::from_params(config.expected_param_count())
    }

    pub fn of_teacher(config: &TeacherNetConfig) -> Self {
        Self::from_params(config.expected_param_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_uses_four_bytes_per_param() {
        let summary = ModelSummary::from_params(262_144);
        assert_eq!(summary.total_params, 262_144);
        assert!((summary.size_mb - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_default_student_footprint() {
        let summary = ModelSummary::of_student(&StudentNetConfig::new());
        assert_eq!(summary.total_params, 490_278);
        assert!((summary.size_mb - 1.87).abs() < 0.01);
    }
}
