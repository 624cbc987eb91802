//! Pipeline configuration
//!
//! Groups everything a training run needs: where the data lives, both network
//! configs, the optimizer settings, epoch budgets and output locations. The
//! configuration is plain serde JSON; missing fields fall back to the defaults.

use std::path::{Path, PathBuf};

use burn::optim::AdamConfig;
use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::model::{StudentNetConfig, TeacherNetConfig};
use crate::utils::error::{ClassifierError, Result};
use crate::{BATCH_SIZE, IMAGE_SIZE};

/// Data source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Dataset root containing `train/` and `val/`
    pub root: PathBuf,
    /// Side length images are resized to
    pub image_size: usize,
    /// Samples per batch for both splits
    pub batch_size: usize,
    /// Decode every image once before training
    pub cache: bool,
    /// Training-time augmentation
    pub augmentation: AugmentationConfig,
    /// Seed of the shuffling and augmentation RNG
    pub seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            image_size: IMAGE_SIZE,
            batch_size: BATCH_SIZE,
            cache: false,
            augmentation: AugmentationConfig::default(),
            seed: 42,
        }
    }
}

/// Optimizer settings shared by both fits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    pub learning_rate: f64,
    pub beta_1: f32,
    pub beta_2: f32,
    pub epsilon: f32,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-7,
        }
    }
}

impl CompileConfig {
    /// Adam configured with these settings
    pub fn adam(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(self.beta_1)
            .with_beta_2(self.beta_2)
            .with_epsilon(self.epsilon)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ClassifierError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        for (name, beta) in [("beta_1", self.beta_1), ("beta_2", self.beta_2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(ClassifierError::Config(format!(
                    "{} must be in [0, 1), got {}",
                    name, beta
                )));
            }
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(ClassifierError::Config(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// Where artifacts and reports are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub models_dir: PathBuf,
    /// Base name of the teacher artifact inside `models_dir`
    pub teacher_artifact: String,
    /// Base name of the student artifact inside `models_dir`
    pub student_artifact: String,
    /// Charts and histories
    pub reports_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            teacher_artifact: "teacher_model".to_string(),
            student_artifact: "student_model".to_string(),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

impl OutputConfig {
    pub fn teacher_path(&self) -> PathBuf {
        self.models_dir.join(&self.teacher_artifact)
    }

    pub fn student_path(&self) -> PathBuf {
        self.models_dir.join(&self.student_artifact)
    }
}

/// Complete configuration of a teacher + student run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub student: StudentNetConfig,
    pub teacher: TeacherNetConfig,
    pub compile: CompileConfig,
    pub teacher_epochs: usize,
    pub student_epochs: usize,
    pub output: OutputConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            student: StudentNetConfig::new(),
            teacher: TeacherNetConfig::new(),
            compile: CompileConfig::default(),
            teacher_epochs: 200,
            student_epochs: 500,
            output: OutputConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ClassifierError::PathNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save the configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Propagate the dataset's class count and the data image size into both networks
    pub fn harmonize(&mut self, num_classes: usize) {
        self.student.num_classes = num_classes;
        self.student.input_size = self.data.image_size;
        self.teacher.num_classes = num_classes;
        self.teacher.input_size = self.data.image_size;
    }

    /// Check every setting that can be checked without touching the data
    pub fn validate(&self) -> Result<()> {
        if self.data.batch_size == 0 {
            return Err(ClassifierError::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.data.image_size == 0 {
            return Err(ClassifierError::Config(
                "image_size must be greater than 0".to_string(),
            ));
        }
        if self.teacher_epochs == 0 || self.student_epochs == 0 {
            return Err(ClassifierError::Config(
                "epoch budgets must be at least 1".to_string(),
            ));
        }
        self.data
            .augmentation
            .validate()
            .map_err(ClassifierError::Config)?;
        self.compile.validate()?;
        self.student.validate()?;
        self.teacher.validate()
    }
}
