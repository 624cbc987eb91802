//! Model artifacts
//!
//! An artifact is a pair of files sharing one base path:
//! - `<base>.json`: the architecture config, enough to rebuild the network
//! - `<base>.mpk`: every parameter, written by Burn's named MessagePack recorder
//!
//! Parameters are stored at full precision so a reloaded model reproduces the
//! saved one's predictions.

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use tracing::info;

use super::student::{StudentNet, StudentNetConfig};
use super::teacher::{TeacherNet, TeacherNetConfig};
use crate::utils::error::{ClassifierError, Result};

type ArtifactRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// A model config that can rebuild the network it describes
pub trait ArchitectureConfig: Config {
    type Model<B: Backend>: Module<B>;

    /// Build an untrained network whose parameters are about to be restored
    fn build<B: Backend>(&self, device: &B::Device) -> Result<Self::Model<B>>;
}

impl ArchitectureConfig for StudentNetConfig {
    type Model<B: Backend> = StudentNet<B>;

    fn build<B: Backend>(&self, device: &B::Device) -> Result<StudentNet<B>> {
        self.init(device)
    }
}

impl ArchitectureConfig for TeacherNetConfig {
    type Model<B: Backend> = TeacherNet<B>;

    fn build<B: Backend>(&self, device: &B::Device) -> Result<TeacherNet<B>> {
        self.init_for_restore(device)
    }
}

/// Paths of the config and parameter files of the artifact at `base`
pub fn artifact_paths(base: &Path) -> (PathBuf, PathBuf) {
    (base.with_extension("json"), base.with_extension("mpk"))
}

/// Write `model` and its architecture config next to each other
pub fn save_artifact<B, C>(model: &C::Model<B>, config: &C, base: &Path) -> Result<()>
where
    B: Backend,
    C: ArchitectureConfig,
{
    let persist_err = |reason: String| ClassifierError::Persist {
        path: base.to_path_buf(),
        reason,
    };

    if let Some(parent) = base.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let (config_path, _) = artifact_paths(base);
    config
        .save(&config_path)
        .map_err(|e| persist_err(format!("config: {}", e)))?;

    model
        .clone()
        .save_file(base.to_path_buf(), &ArtifactRecorder::new())
        .map_err(|e| persist_err(format!("parameters: {:?}", e)))?;

    info!("Saved model artifact to {:?}", base);
    Ok(())
}

/// Rebuild the network stored at `base` and restore its parameters
pub fn load_artifact<B, C>(base: &Path, device: &B::Device) -> Result<(C, C::Model<B>)>
where
    B: Backend,
    C: ArchitectureConfig,
{
    let (config_path, params_path) = artifact_paths(base);
    for path in [&config_path, &params_path] {
        if !path.exists() {
            return Err(ClassifierError::PathNotFound(path.clone()));
        }
    }

    let mismatch = |reason: String| ClassifierError::SerializationMismatch {
        path: base.to_path_buf(),
        reason,
    };

    let config = C::load(&config_path).map_err(|e| mismatch(format!("config: {}", e)))?;
    let model = config
        .build::<B>(device)?
        .load_file(base.to_path_buf(), &ArtifactRecorder::new(), device)
        .map_err(|e| mismatch(format!("parameters: {:?}", e)))?;

    info!("Loaded model artifact from {:?}", base);
    Ok((config, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::backbone::BackboneConfig;
    use burn::tensor::{Distribution, Tensor};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn outputs(model: &StudentNet<TestBackend>, input: Tensor<TestBackend, 4>) -> Vec<f32> {
        model.forward(input).into_data().to_vec().unwrap()
    }

    #[test]
    fn test_artifact_paths() {
        let (config, params) = artifact_paths(Path::new("models/student_model"));
        assert_eq!(config, PathBuf::from("models/student_model.json"));
        assert_eq!(params, PathBuf::from("models/student_model.mpk"));
    }

    #[test]
    fn test_student_artifact_reproduces_outputs() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("models").join("student_model");

        let config = StudentNetConfig::new().with_input_size(32);
        let model = config.init::<TestBackend>(&device).unwrap();
        save_artifact::<TestBackend, _>(&model, &config, &base).unwrap();

        let (config_path, params_path) = artifact_paths(&base);
        assert!(config_path.exists());
        assert!(params_path.exists());

        let (loaded_config, loaded) =
            load_artifact::<TestBackend, StudentNetConfig>(&base, &device).unwrap();
        assert_eq!(loaded_config.stage_widths, config.stage_widths);
        assert_eq!(loaded.num_params(), model.num_params());

        let input =
            Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        let expected = outputs(&model, input.clone());
        let actual = outputs(&loaded, input);
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_teacher_artifact_roundtrip() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("teacher_model");

        let config = TeacherNetConfig::new()
            .with_input_size(32)
            .with_backbone(BackboneConfig::tiny())
            .with_feature_channels(64)
            .with_head_units(16);
        let model = config.init::<TestBackend>(&device).unwrap();
        save_artifact::<TestBackend, _>(&model, &config, &base).unwrap();

        let (_, loaded) = load_artifact::<TestBackend, TeacherNetConfig>(&base, &device).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = loaded.forward(input).into_data().to_vec().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_missing_artifact_reported() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();

        let result =
            load_artifact::<TestBackend, StudentNetConfig>(&dir.path().join("absent"), &device);
        assert!(matches!(result, Err(ClassifierError::PathNotFound(_))));
    }

    #[test]
    fn test_corrupt_parameters_detected() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("student_model");

        let config = StudentNetConfig::new().with_input_size(32);
        let model = config.init::<TestBackend>(&device).unwrap();
        save_artifact::<TestBackend, _>(&model, &config, &base).unwrap();

        let (_, params_path) = artifact_paths(&base);
        std::fs::write(&params_path, b"not a record").unwrap();

        let result = load_artifact::<TestBackend, StudentNetConfig>(&base, &device);
        assert!(matches!(
            result,
            Err(ClassifierError::SerializationMismatch { .. })
        ));
    }
}
