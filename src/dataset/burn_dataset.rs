//! Burn Dataset Integration
//!
//! This module implements Burn's Dataset trait and Batcher for the image folders.
//! Images are resized to a square, converted to RGB and stored as CHW floats in
//! [0, 1]; no further normalisation is applied.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::ImageReader;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::error::{ClassifierError, Result};

/// Number of colour channels fed to the networks
pub const CHANNELS: usize = 3;

/// A single image ready for Burn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageItem {
    /// Image data as flattened CHW float array [3 * H * W]
    pub image: Vec<f32>,
    /// Class label
    pub label: usize,
    /// Image path (for debugging/logging)
    pub path: String,
}

impl ImageItem {
    /// Load, resize and rescale an image
    pub fn from_path(path: &Path, label: usize, image_size: usize) -> Result<Self> {
        let load_err = |reason: String| ClassifierError::ImageLoad(path.to_path_buf(), reason);

        let img = ImageReader::open(path)
            .map_err(|e| load_err(e.to_string()))?
            .decode()
            .map_err(|e| load_err(e.to_string()))?
            .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
            .to_rgb8();

        let plane = image_size * image_size;
        let mut image = vec![0.0f32; CHANNELS * plane];

        // HWC bytes -> CHW floats in [0, 1]
        for (x, y, pixel) in img.enumerate_pixels() {
            let offset = y as usize * image_size + x as usize;
            for c in 0..CHANNELS {
                image[c * plane + offset] = pixel[c] as f32 / 255.0;
            }
        }

        Ok(Self {
            image,
            label,
            path: path.to_string_lossy().to_string(),
        })
    }

    /// Create from pre-loaded image data
    pub fn from_data(image: Vec<f32>, label: usize, path: String) -> Self {
        Self { image, label, path }
    }
}

/// Image dataset implementing Burn's Dataset trait
///
/// Images are decoded on demand unless the dataset was built with
/// [`ImageDataset::new_cached`].
#[derive(Debug, Clone)]
pub struct ImageDataset {
    samples: Vec<(PathBuf, usize)>,
    image_size: usize,
    cached_items: Option<Vec<ImageItem>>,
}

impl ImageDataset {
    pub fn new(samples: Vec<(PathBuf, usize)>, image_size: usize) -> Self {
        Self {
            samples,
            image_size,
            cached_items: None,
        }
    }

    /// Decode every image up front, in parallel
    pub fn new_cached(samples: Vec<(PathBuf, usize)>, image_size: usize) -> Result<Self> {
        let total = samples.len();
        info!("Pre-loading {} images into memory", total);

        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let loaded = AtomicUsize::new(0);
        let items = samples
            .par_iter()
            .map(|(path, label)| {
                let item = ImageItem::from_path(path, *label, image_size);
                let count = loaded.fetch_add(1, Ordering::Relaxed);
                if count % 100 == 0 {
                    pb.set_position(count as u64);
                }
                item
            })
            .collect::<Result<Vec<_>>>()?;

        pb.finish_and_clear();
        info!("Cached {} images", items.len());

        Ok(Self {
            samples,
            image_size,
            cached_items: Some(items),
        })
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn is_cached(&self) -> bool {
        self.cached_items.is_some()
    }

    /// Fetch one item, reporting decode failures
    pub fn load(&self, index: usize) -> Result<ImageItem> {
        if let Some(cached) = &self.cached_items {
            if let Some(item) = cached.get(index) {
                return Ok(item.clone());
            }
        }

        let (path, label) = self.samples.get(index).ok_or_else(|| {
            ClassifierError::Training(format!(
                "sample index {} out of range ({} samples)",
                index,
                self.samples.len()
            ))
        })?;
        ImageItem::from_path(path, *label, self.image_size)
    }

    /// Fetch several items in parallel, preserving order
    pub fn load_many(&self, indices: &[usize]) -> Result<Vec<ImageItem>> {
        indices.par_iter().map(|&i| self.load(i)).collect()
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.load(index).ok()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of images for training or evaluation
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Class indices with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
    /// One-hot labels with shape [batch_size, num_classes]
    pub one_hot: Tensor<B, 2>,
}

/// Batcher turning [`ImageItem`]s into tensors on any backend
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
    num_classes: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize, num_classes: usize) -> Self {
        Self {
            image_size,
            num_classes,
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.clone()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(
                images_data,
                [batch_size, CHANNELS, self.image_size, self.image_size],
            ),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        let mut one_hot_data = vec![0.0f32; batch_size * self.num_classes];
        for (row, item) in items.iter().enumerate() {
            if item.label < self.num_classes {
                one_hot_data[row * self.num_classes + item.label] = 1.0;
            }
        }
        let one_hot = Tensor::<B, 2>::from_floats(
            TensorData::new(one_hot_data, [batch_size, self.num_classes]),
            device,
        );

        ImageBatch {
            images,
            targets,
            one_hot,
        }
    }
}
