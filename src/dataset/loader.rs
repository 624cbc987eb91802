//! Image folder loader
//!
//! Scans a dataset root laid out as
//!
//! ```text
//! root/
//! ├── train/
//! │   ├── class_a/ *.jpg|*.jpeg|*.png|*.bmp
//! │   └── class_b/ ...
//! └── val/
//!     ├── class_a/ ...
//!     └── class_b/ ...
//! ```
//!
//! Class indices are positions in the sorted list of class directory names, and
//! both splits must agree on that list.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{ClassifierError, Result};

/// Subdirectory holding the training split
pub const TRAIN_DIR: &str = "train";

/// Subdirectory holding the validation split
pub const VAL_DIR: &str = "val";

/// File extensions accepted as images
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index
    pub label: usize,
}

/// All images of one split, grouped by class directory
#[derive(Debug, Clone)]
pub struct ImageFolder {
    /// Split directory
    pub root: PathBuf,
    /// Samples ordered by class, then file name
    pub samples: Vec<ImageSample>,
    /// Sorted class names; the index is the label
    pub classes: Vec<String>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

impl ImageFolder {
    /// Scan one split directory
    pub fn scan<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(ClassifierError::PathNotFound(root));
        }

        let mut classes: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    classes.push(name.to_string());
                }
            }
        }
        classes.sort();

        let mut samples = Vec::new();
        for (label, class_name) in classes.iter().enumerate() {
            let before = samples.len();
            for entry in WalkDir::new(root.join(class_name))
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if entry.file_type().is_file() && is_image(path) {
                    samples.push(ImageSample {
                        path: path.to_path_buf(),
                        label,
                    });
                }
            }
            debug!("  {}: {} images", class_name, samples.len() - before);
        }

        Ok(Self {
            root,
            samples,
            classes,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Number of images per class label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.classes.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }

    /// `(path, label)` pairs in sample order
    pub fn pairs(&self) -> Vec<(PathBuf, usize)> {
        self.samples
            .iter()
            .map(|s| (s.path.clone(), s.label))
            .collect()
    }
}

/// Train and validation splits of one dataset root
#[derive(Debug, Clone)]
pub struct DirectoryLayout {
    pub root: PathBuf,
    pub train: ImageFolder,
    pub val: ImageFolder,
}

impl DirectoryLayout {
    /// Open `root/train` and `root/val` and check they are usable together
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!("Loading dataset from: {:?}", root);

        if !root.is_dir() {
            return Err(ClassifierError::PathNotFound(root));
        }

        let train = ImageFolder::scan(root.join(TRAIN_DIR))?;
        let val = ImageFolder::scan(root.join(VAL_DIR))?;

        for (split, folder) in [(TRAIN_DIR, &train), (VAL_DIR, &val)] {
            if folder.is_empty() {
                return Err(ClassifierError::EmptySplit {
                    split: split.to_string(),
                    path: folder.root.clone(),
                });
            }
        }

        if train.classes != val.classes {
            return Err(ClassifierError::ClassMismatch {
                train: train.classes.clone(),
                val: val.classes.clone(),
            });
        }

        info!(
            "Found {} classes: {} train / {} val images",
            train.num_classes(),
            train.len(),
            val.len()
        );

        Ok(Self { root, train, val })
    }

    /// Sorted class names shared by both splits
    pub fn classes(&self) -> &[String] {
        &self.train.classes
    }

    pub fn num_classes(&self) -> usize {
        self.train.num_classes()
    }

    /// Mapping from class name to label
    pub fn class_to_idx(&self) -> HashMap<String, usize> {
        self.classes()
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::{write_class_images, write_split_dataset};
    use tempfile::TempDir;

    #[test]
    fn test_sorted_classes_define_labels() {
        let temp_dir = TempDir::new().unwrap();
        let split = temp_dir.path().join("train");
        write_class_images(&split.join("zebra"), 2, [0, 0, 0]);
        write_class_images(&split.join("aardvark"), 3, [255, 255, 255]);

        let folder = ImageFolder::scan(&split).unwrap();
        assert_eq!(folder.classes, vec!["aardvark", "zebra"]);
        assert_eq!(folder.class_counts(), vec![3, 2]);
        assert!(folder.samples[..3].iter().all(|s| s.label == 0));
    }

    #[test]
    fn test_non_images_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let class_dir = temp_dir.path().join("a");
        write_class_images(&class_dir, 2, [10, 20, 30]);
        std::fs::write(class_dir.join("notes.txt"), "not an image").unwrap();

        let folder = ImageFolder::scan(temp_dir.path()).unwrap();
        assert_eq!(folder.len(), 2);
    }

    #[test]
    fn test_sample_order_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        write_class_images(&temp_dir.path().join("a"), 5, [0, 0, 0]);

        let first = ImageFolder::scan(temp_dir.path()).unwrap();
        let second = ImageFolder::scan(temp_dir.path()).unwrap();
        assert_eq!(first.samples, second.samples);
    }

    #[test]
    fn test_open_layout() {
        let temp_dir = TempDir::new().unwrap();
        write_split_dataset(temp_dir.path(), 4, 2);

        let layout = DirectoryLayout::open(temp_dir.path()).unwrap();
        assert_eq!(layout.num_classes(), 2);
        assert_eq!(layout.train.len(), 8);
        assert_eq!(layout.val.len(), 4);
        assert_eq!(layout.class_to_idx()["class_b"], 1);
    }

    #[test]
    fn test_missing_root() {
        let result = DirectoryLayout::open("/nonexistent/dataset");
        assert!(matches!(result, Err(ClassifierError::PathNotFound(_))));
    }

    #[test]
    fn test_empty_val_split() {
        let temp_dir = TempDir::new().unwrap();
        write_class_images(&temp_dir.path().join("train").join("a"), 2, [0, 0, 0]);
        std::fs::create_dir_all(temp_dir.path().join("val").join("a")).unwrap();

        match DirectoryLayout::open(temp_dir.path()) {
            Err(ClassifierError::EmptySplit { split, .. }) => assert_eq!(split, "val"),
            other => panic!("expected empty split error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_class_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        write_class_images(&temp_dir.path().join("train").join("a"), 1, [0, 0, 0]);
        write_class_images(&temp_dir.path().join("train").join("b"), 1, [0, 0, 0]);
        write_class_images(&temp_dir.path().join("val").join("a"), 1, [0, 0, 0]);

        let result = DirectoryLayout::open(temp_dir.path());
        assert!(matches!(result, Err(ClassifierError::ClassMismatch { .. })));
    }
}
