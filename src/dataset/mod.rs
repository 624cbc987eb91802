//! Dataset module: image folders, Burn batching and the shared data source
//!
//! This module provides:
//! - Directory scanning for `train/` and `val/` class folders
//! - Burn `Dataset` and `Batcher` implementations
//! - Training-time augmentation
//! - The [`DataSource`] and its exclusive [`DatasetSession`]

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod session;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{ImageBatch, ImageBatcher, ImageDataset, ImageItem};
pub use loader::{DirectoryLayout, ImageFolder, ImageSample};
pub use session::{steps_for, DataSource, DatasetSession};
