//! Fit and evaluate engine
//!
//! A [`Trainer`] pairs a network with its Adam optimizer ("compiling" it) and
//! drives it through a [`DatasetSession`]:
//! - Forward/backward passes with automatic differentiation
//! - Categorical cross-entropy on one-hot labels
//! - Accuracy on the argmax of the logits
//! - Validation on the inner (non-autodiff) backend after every epoch

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    tensor::{
        activation::log_softmax,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use super::history::{EpochRecord, TrainingHistory};
use crate::config::CompileConfig;
use crate::dataset::{DatasetSession, ImageBatch, ImageBatcher, ImageItem};
use crate::model::ImageClassifier;
use crate::utils::error::{ClassifierError, Result};
use crate::utils::logging::TrainingLogger;

/// Mean categorical cross-entropy between logits and one-hot targets
pub fn categorical_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    one_hot: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (log_probs * one_hot).sum_dim(1).mean().neg()
}

/// Number of rows whose argmax equals the target class
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let predictions = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// Loss and accuracy over a set of batches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Mean per-batch loss
    pub loss: f64,
    /// Fraction of correctly classified samples
    pub accuracy: f64,
    pub samples: usize,
}

/// Evaluate `model` on already-loaded batches, without gradients
pub fn evaluate_batches<B, M, I>(
    model: &M,
    batches: I,
    batcher: &ImageBatcher,
    device: &B::Device,
) -> Result<Evaluation>
where
    B: Backend,
    M: ImageClassifier<B>,
    I: Iterator<Item = Result<Vec<ImageItem>>>,
{
    let mut total_loss = 0.0f64;
    let mut num_batches = 0usize;
    let mut correct = 0usize;
    let mut samples = 0usize;

    for items in batches {
        let batch: ImageBatch<B> = batcher.batch(items?, device);
        let logits = model.logits(batch.images);

        let loss: f64 = categorical_cross_entropy(logits.clone(), batch.one_hot)
            .into_scalar()
            .elem();
        total_loss += loss;
        num_batches += 1;

        samples += batch.targets.dims()[0];
        correct += count_correct(logits, batch.targets);
    }

    if samples == 0 {
        return Err(ClassifierError::Training(
            "evaluation saw no samples".to_string(),
        ));
    }

    Ok(Evaluation {
        loss: total_loss / num_batches as f64,
        accuracy: correct as f64 / samples as f64,
        samples,
    })
}

/// A network compiled with its optimizer
pub struct Trainer<B: AutodiffBackend, M, O> {
    name: String,
    model: M,
    optimizer: O,
    learning_rate: f64,
    device: B::Device,
}

/// Attach an Adam optimizer configured by `config` to `model`
pub fn compile<B, M>(
    name: &str,
    model: M,
    config: &CompileConfig,
    device: &B::Device,
) -> Trainer<B, M, impl Optimizer<M, B>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
{
    info!(
        "Compiling {}: Adam(lr={}, beta_1={}, beta_2={}, epsilon={}), categorical cross-entropy",
        name, config.learning_rate, config.beta_1, config.beta_2, config.epsilon
    );

    Trainer {
        name: name.to_string(),
        model,
        optimizer: config.adam().init::<B, M>(),
        learning_rate: config.learning_rate,
        device: device.clone(),
    }
}

impl<B, M, O> Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    M::InnerModule: ImageClassifier<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Train for `epochs` epochs, validating after each one
    pub fn fit(&mut self, session: &mut DatasetSession<'_>, epochs: usize) -> Result<TrainingHistory> {
        let steps = session.steps_per_epoch()?;
        let val_steps = session.validation_steps()?;
        let batcher = ImageBatcher::new(session.image_size(), session.num_classes());

        info!(
            "Fitting {} for {} epochs ({} steps, {} validation steps per epoch)",
            self.name, epochs, steps, val_steps
        );

        let mut history = TrainingHistory::new();
        let mut logger = TrainingLogger::new(&self.name, epochs);

        let pb = ProgressBar::new(epochs as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_prefix(self.name.clone());

        for epoch in 0..epochs {
            logger.start_epoch(epoch);

            let (train_loss, train_accuracy) = self.train_epoch(session, &batcher)?;
            let validation = self.evaluate(session)?;

            let record = EpochRecord::new(
                epoch,
                train_loss,
                train_accuracy,
                validation.loss,
                validation.accuracy,
            );
            logger.end_epoch(&record);
            history.push(record);

            pb.set_message(format!("val_acc {:.2}%", validation.accuracy * 100.0));
            pb.inc(1);
        }

        pb.finish_and_clear();
        logger.log_complete(history.best_val_accuracy());

        Ok(history)
    }

    /// One pass over the shuffled training split; returns mean loss and accuracy
    fn train_epoch(
        &mut self,
        session: &mut DatasetSession<'_>,
        batcher: &ImageBatcher,
    ) -> Result<(f64, f64)> {
        let mut epoch_loss = 0.0f64;
        let mut num_batches = 0usize;
        let mut correct = 0usize;
        let mut samples = 0usize;

        let batches = session.train_epoch()?;
        let steps = batches.steps();

        for (batch_idx, items) in batches.enumerate() {
            let batch: ImageBatch<B> = batcher.batch(items?, &self.device);

            let logits = self.model.logits(batch.images);
            let loss = categorical_cross_entropy(logits.clone(), batch.one_hot);

            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(ClassifierError::Training(format!(
                    "{}: non-finite loss at batch {}",
                    self.name,
                    batch_idx + 1
                )));
            }
            epoch_loss += loss_value;
            num_batches += 1;

            samples += batch.targets.dims()[0];
            correct += count_correct(logits, batch.targets);

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self
                .optimizer
                .step(self.learning_rate, self.model.clone(), grads);

            debug!(
                "[{}] batch {}/{}: loss = {:.4}, acc = {:.2}%",
                self.name,
                batch_idx + 1,
                steps,
                loss_value,
                100.0 * correct as f64 / samples as f64
            );
        }

        if num_batches == 0 {
            return Err(ClassifierError::Training(format!(
                "{}: epoch produced no batches",
                self.name
            )));
        }

        Ok((
            epoch_loss / num_batches as f64,
            correct as f64 / samples as f64,
        ))
    }

    /// Loss and accuracy on the validation split
    pub fn evaluate(&self, session: &DatasetSession<'_>) -> Result<Evaluation> {
        let batcher = ImageBatcher::new(session.image_size(), session.num_classes());
        let model = self.model.valid();

        evaluate_batches::<B::InnerBackend, _, _>(&model, session.validation()?, &batcher, &self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataConfig;
    use crate::dataset::test_support::write_split_dataset;
    use crate::dataset::{AugmentationConfig, DataSource};
    use crate::model::StudentNetConfig;
    use burn::backend::Autodiff;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    #[test]
    fn test_cross_entropy_of_uniform_logits() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::zeros([4, 2], &device);
        let one_hot = Tensor::<TestBackend, 2>::from_floats(
            TensorData::new(vec![1.0f32, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0], [4, 2]),
            &device,
        );

        let loss: f64 = categorical_cross_entropy(logits, one_hot).into_scalar().elem();
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_confident_correct_logits_have_low_loss() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats(
            TensorData::new(vec![10.0f32, -10.0, -10.0, 10.0], [2, 2]),
            &device,
        );
        let one_hot = Tensor::<TestBackend, 2>::from_floats(
            TensorData::new(vec![1.0f32, 0.0, 0.0, 1.0], [2, 2]),
            &device,
        );

        let loss: f64 = categorical_cross_entropy(logits, one_hot).into_scalar().elem();
        assert!(loss < 1e-4);
    }

    #[test]
    fn test_count_correct() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats(
            TensorData::new(vec![0.9f32, 0.1, 0.2, 0.8, 0.7, 0.3], [3, 2]),
            &device,
        );
        let targets =
            Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![0i64, 1, 1], [3]), &device);

        assert_eq!(count_correct(logits, targets), 2);
    }

    #[test]
    fn test_fit_returns_one_record_per_epoch() {
        let temp_dir = TempDir::new().unwrap();
        write_split_dataset(temp_dir.path(), 8, 4);

        let mut source = DataSource::open(&DataConfig {
            root: temp_dir.path().to_path_buf(),
            image_size: 32,
            batch_size: 8,
            cache: true,
            augmentation: AugmentationConfig::none(),
            seed: 1,
        })
        .unwrap();

        let device = Default::default();
        let model = StudentNetConfig::new()
            .with_input_size(32)
            .with_stage_widths(vec![16, 32])
            .with_dense_units(16)
            .init::<TestAutodiffBackend>(&device)
            .unwrap();

        let mut trainer = compile("student", model, &CompileConfig::default(), &device);
        let mut session = source.acquire("fit");
        let history = trainer.fit(&mut session, 2).unwrap();

        assert_eq!(history.len(), 2);
        for (i, record) in history.records().iter().enumerate() {
            assert_eq!(record.epoch, i);
            assert!(record.train_loss.is_finite());
            assert!((0.0..=1.0).contains(&record.train_accuracy));
            assert!((0.0..=1.0).contains(&record.val_accuracy));
        }

        let evaluation = trainer.evaluate(&session).unwrap();
        assert_eq!(evaluation.samples, 8);
    }
}
