//! # Compact Classifier
//!
//! Image classification with a large pretrained-backbone teacher and a compact
//! student network, built on the Burn framework.
//!
//! ## Features
//!
//! - **Student network** of depthwise-separable convolution stages, each
//!   followed by squeeze-and-excitation channel attention
//! - **Teacher network** on a residual backbone that can load pretrained weights
//! - **Shared data source** over `train/` and `val/` class folders, used by one
//!   fit at a time
//! - **Artifacts** written as a JSON architecture config plus a MessagePack record
//!
//! ## Modules
//!
//! - `dataset`: Directory scanning, augmentation, Burn datasets and batching
//! - `model`: Attention block, convolution stages, student, teacher and artifacts
//! - `training`: Fit/evaluate engine, history and the run orchestrator
//! - `utils`: Errors, logging, charts and helper functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use compact_classifier::backend::{default_device, TrainingBackend};
//! use compact_classifier::{Orchestrator, PipelineConfig};
//!
//! let mut config = PipelineConfig::default();
//! config.data.root = "data/images".into();
//!
//! let mut orchestrator = Orchestrator::<TrainingBackend>::new(config, default_device())?;
//! let report = orchestrator.run()?;
//! println!("accuracy: {:.2}", report.reloaded_accuracy);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{CompileConfig, DataConfig, OutputConfig, PipelineConfig};
pub use dataset::{DataSource, DatasetSession, DirectoryLayout};
pub use model::{
    load_artifact, save_artifact, ImageClassifier, ModelSummary, StudentNet, StudentNetConfig,
    TeacherNet, TeacherNetConfig,
};
pub use training::{Orchestrator, Phase, RunReport, TrainingHistory};
pub use utils::error::{ClassifierError, Result};

/// Default square input size in pixels
pub const IMAGE_SIZE: usize = 224;

/// Default batch size
pub const BATCH_SIZE: usize = 32;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
