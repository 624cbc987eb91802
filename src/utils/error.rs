//! Error Handling Module
//!
//! Defines the error type shared by the builders, the data source and the
//! training orchestrator. Uses thiserror for ergonomic error definitions.
//!
//! Errors fall into four families:
//! - configuration problems detected before any fit starts
//! - shape-contract violations detected while a network is being built
//! - degenerate step counts (a split smaller than one batch)
//! - serialization mismatches when a persisted artifact is read back

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for classifier construction and training
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Invalid or inconsistent configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required directory or file does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// A dataset split contains no usable images
    #[error("Dataset split '{split}' at {path:?} contains no images")]
    EmptySplit { split: String, path: PathBuf },

    /// Train and validation splits disagree on the class set
    #[error("Class mismatch between splits: train has {train:?}, val has {val:?}")]
    ClassMismatch { train: Vec<String>, val: Vec<String> },

    /// Pretrained backbone weights could not be read
    #[error("Failed to read pretrained weights from {path:?}: {reason}")]
    PretrainedWeights { path: PathBuf, reason: String },

    /// A tensor does not have the shape a component was built for
    #[error("Shape contract violated in {component}: {detail} (shape {shape:?})")]
    ShapeContract {
        component: String,
        shape: Vec<usize>,
        detail: String,
    },

    /// A split yields zero batches per epoch
    #[error(
        "Split '{split}' yields zero steps: {samples} samples with batch size {batch_size}"
    )]
    DegenerateSteps {
        split: String,
        samples: usize,
        batch_size: usize,
    },

    /// A persisted artifact could not be turned back into a working model
    #[error("Model artifact {path:?} does not round-trip: {reason}")]
    SerializationMismatch { path: PathBuf, reason: String },

    /// Writing a model artifact failed
    #[error("Failed to persist model artifact {path:?}: {reason}")]
    Persist { path: PathBuf, reason: String },

    /// Failure inside a fit or evaluate call
    #[error("Training error: {0}")]
    Training(String),

    /// An orchestrator step was invoked in the wrong phase
    #[error("Cannot {attempted} while orchestrator is in phase {phase}")]
    OutOfOrder { attempted: String, phase: String },

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClassifierError {
    /// Build a shape-contract error for `component`
    pub fn shape(component: &str, shape: &[usize], detail: impl Into<String>) -> Self {
        Self::ShapeContract {
            component: component.to_string(),
            shape: shape.to_vec(),
            detail: detail.into(),
        }
    }

    /// True for errors that are raised before any training starts
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::PathNotFound(_)
                | Self::EmptySplit { .. }
                | Self::ClassMismatch { .. }
                | Self::PretrainedWeights { .. }
        )
    }
}

impl From<serde_json::Error> for ClassifierError {
    fn from(err: serde_json::Error) -> Self {
        ClassifierError::Serialization(err.to_string())
    }
}

/// Convenience Result type for classifier operations
pub type Result<T> = std::result::Result<T, ClassifierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClassifierError::Config("test error".to_string());
        assert_eq!(format!("{}", err), "Configuration error: test error");
    }

    #[test]
    fn test_shape_error_carries_shape() {
        let err = ClassifierError::shape("channel attention", &[32], "reduced width is zero");
        let msg = err.to_string();
        assert!(msg.contains("channel attention"));
        assert!(msg.contains("[32]"));
    }

    #[test]
    fn test_degenerate_steps_display() {
        let err = ClassifierError::DegenerateSteps {
            split: "val".to_string(),
            samples: 10,
            batch_size: 32,
        };
        assert!(err.to_string().contains("zero steps"));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_configuration_family() {
        assert!(ClassifierError::PathNotFound(PathBuf::from("/nope")).is_configuration());
        assert!(ClassifierError::ClassMismatch {
            train: vec!["a".into()],
            val: vec!["b".into()],
        }
        .is_configuration());
        assert!(!ClassifierError::Training("boom".into()).is_configuration());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ClassifierError = io_err.into();
        assert!(matches!(err, ClassifierError::Io(_)));
    }
}
