//! Data source and exclusive dataset sessions
//!
//! A [`DataSource`] owns both splits, the batch size and the RNG used for
//! shuffling and augmentation. Fit and evaluate calls do not touch it directly:
//! they [`acquire`](DataSource::acquire) a [`DatasetSession`], which borrows the
//! source mutably until it is dropped, so two consumers can never interleave.
//!
//! Every epoch restarts at the beginning of its split. Training order is
//! reshuffled per epoch and the trailing partial batch is dropped; validation
//! reads files in order, without augmentation.

use burn::data::dataset::Dataset;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::augmentation::Augmenter;
use super::burn_dataset::{ImageDataset, ImageItem};
use super::loader::{DirectoryLayout, TRAIN_DIR, VAL_DIR};
use crate::config::DataConfig;
use crate::utils::error::{ClassifierError, Result};

/// Full batches per epoch for a split: `floor(samples / batch_size)`, at least one
pub fn steps_for(split: &str, samples: usize, batch_size: usize) -> Result<usize> {
    let steps = if batch_size == 0 { 0 } else { samples / batch_size };
    if steps == 0 {
        return Err(ClassifierError::DegenerateSteps {
            split: split.to_string(),
            samples,
            batch_size,
        });
    }
    Ok(steps)
}

/// Restartable batch source over the train and validation splits
pub struct DataSource {
    layout: DirectoryLayout,
    train: ImageDataset,
    val: ImageDataset,
    batch_size: usize,
    image_size: usize,
    augmenter: Augmenter,
    rng: ChaCha8Rng,
    sessions: usize,
}

impl DataSource {
    /// Scan the dataset root and prepare both splits
    pub fn open(config: &DataConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(ClassifierError::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        let layout = DirectoryLayout::open(&config.root)?;

        let (train, val) = if config.cache {
            (
                ImageDataset::new_cached(layout.train.pairs(), config.image_size)?,
                ImageDataset::new_cached(layout.val.pairs(), config.image_size)?,
            )
        } else {
            (
                ImageDataset::new(layout.train.pairs(), config.image_size),
                ImageDataset::new(layout.val.pairs(), config.image_size),
            )
        };

        Ok(Self {
            layout,
            train,
            val,
            batch_size: config.batch_size,
            image_size: config.image_size,
            augmenter: Augmenter::new(config.augmentation.clone(), config.image_size),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            sessions: 0,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.layout.num_classes()
    }

    pub fn classes(&self) -> &[String] {
        self.layout.classes()
    }

    pub fn train_len(&self) -> usize {
        self.layout.train.len()
    }

    pub fn val_len(&self) -> usize {
        self.layout.val.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Training batches per epoch
    pub fn steps_per_epoch(&self) -> Result<usize> {
        steps_for(TRAIN_DIR, self.train_len(), self.batch_size)
    }

    /// Validation batches per evaluation
    pub fn validation_steps(&self) -> Result<usize> {
        steps_for(VAL_DIR, self.val_len(), self.batch_size)
    }

    /// Take exclusive use of the source for one fit or evaluate call
    pub fn acquire(&mut self, purpose: &str) -> DatasetSession<'_> {
        self.sessions += 1;
        debug!("Dataset session #{} acquired for {}", self.sessions, purpose);
        DatasetSession {
            source: self,
            purpose: purpose.to_string(),
            epochs: 0,
        }
    }
}

/// Exclusive access to a [`DataSource`]; released on drop
pub struct DatasetSession<'a> {
    source: &'a mut DataSource,
    purpose: String,
    epochs: usize,
}

impl<'a> DatasetSession<'a> {
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn num_classes(&self) -> usize {
        self.source.num_classes()
    }

    pub fn image_size(&self) -> usize {
        self.source.image_size
    }

    pub fn batch_size(&self) -> usize {
        self.source.batch_size
    }

    pub fn steps_per_epoch(&self) -> Result<usize> {
        self.source.steps_per_epoch()
    }

    pub fn validation_steps(&self) -> Result<usize> {
        self.source.validation_steps()
    }

    /// Epochs started through this session
    pub fn epochs_started(&self) -> usize {
        self.epochs
    }

    /// Start a training epoch: shuffled, augmented, full batches only
    pub fn train_epoch(&mut self) -> Result<TrainBatches<'_>> {
        let steps = self.source.steps_per_epoch()?;
        self.epochs += 1;

        let DataSource {
            train,
            augmenter,
            rng,
            batch_size,
            ..
        } = &mut *self.source;

        let mut order: Vec<usize> = (0..train.len()).collect();
        order.shuffle(&mut *rng);
        order.truncate(steps * *batch_size);

        Ok(TrainBatches {
            dataset: train,
            augmenter,
            rng,
            order,
            batch_size: *batch_size,
            next: 0,
        })
    }

    /// Validation batches in file order
    pub fn validation(&self) -> Result<ValidationBatches<'_>> {
        let steps = self.source.validation_steps()?;
        Ok(ValidationBatches {
            dataset: &self.source.val,
            batch_size: self.source.batch_size,
            steps,
            next: 0,
        })
    }
}

impl Drop for DatasetSession<'_> {
    fn drop(&mut self) {
        debug!(
            "Dataset session for {} released after {} epoch(s)",
            self.purpose, self.epochs
        );
    }
}

/// Iterator over the batches of one training epoch
pub struct TrainBatches<'s> {
    dataset: &'s ImageDataset,
    augmenter: &'s Augmenter,
    rng: &'s mut ChaCha8Rng,
    order: Vec<usize>,
    batch_size: usize,
    next: usize,
}

impl TrainBatches<'_> {
    /// Number of batches this epoch yields
    pub fn steps(&self) -> usize {
        self.order.len() / self.batch_size
    }
}

impl Iterator for TrainBatches<'_> {
    type Item = Result<Vec<ImageItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next * self.batch_size;
        if start >= self.order.len() {
            return None;
        }
        self.next += 1;

        let indices = &self.order[start..start + self.batch_size];
        let mut items = match self.dataset.load_many(indices) {
            Ok(items) => items,
            Err(e) => return Some(Err(e)),
        };

        // Sequential so the augmentation stream depends only on the seed
        for item in items.iter_mut() {
            self.augmenter.augment(&mut item.image, &mut *self.rng);
        }
        Some(Ok(items))
    }
}

/// Iterator over the validation batches, in file order
pub struct ValidationBatches<'s> {
    dataset: &'s ImageDataset,
    batch_size: usize,
    steps: usize,
    next: usize,
}

impl ValidationBatches<'_> {
    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl Iterator for ValidationBatches<'_> {
    type Item = Result<Vec<ImageItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.steps {
            return None;
        }
        let start = self.next * self.batch_size;
        self.next += 1;

        let indices: Vec<usize> = (start..start + self.batch_size).collect();
        Some(self.dataset.load_many(&indices))
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("root", &self.layout.root)
            .field("classes", &self.layout.classes())
            .field("train", &self.train_len())
            .field("val", &self.val_len())
            .field("batch_size", &self.batch_size)
            .field("cached", &self.train.is_cached())
            .finish()
    }
}

/// Log the shape of the data the run will see
pub fn log_data_summary(source: &DataSource) {
    info!(
        "Data: {} classes {:?}, {} train / {} val images, batch size {}",
        source.num_classes(),
        source.classes(),
        source.train_len(),
        source.val_len(),
        source.batch_size()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::AugmentationConfig;
    use crate::dataset::test_support::write_split_dataset;
    use tempfile::TempDir;

    fn config(root: &std::path::Path, batch_size: usize) -> DataConfig {
        DataConfig {
            root: root.to_path_buf(),
            image_size: 8,
            batch_size,
            cache: false,
            augmentation: AugmentationConfig::none(),
            seed: 42,
        }
    }

    #[test]
    fn test_steps_floor_division() {
        assert_eq!(steps_for("train", 64, 32).unwrap(), 2);
        assert_eq!(steps_for("val", 32, 32).unwrap(), 1);
        assert_eq!(steps_for("train", 1000, 32).unwrap(), 31);
        assert_eq!(1000 - 31 * 32, 8);
    }

    #[test]
    fn test_degenerate_steps() {
        match steps_for("val", 31, 32) {
            Err(ClassifierError::DegenerateSteps {
                split,
                samples,
                batch_size,
            }) => {
                assert_eq!(split, "val");
                assert_eq!(samples, 31);
                assert_eq!(batch_size, 32);
            }
            other => panic!("expected degenerate steps, got {:?}", other),
        }
    }

    #[test]
    fn test_epoch_drops_partial_batch() {
        let temp_dir = TempDir::new().unwrap();
        write_split_dataset(temp_dir.path(), 5, 2);
        let mut source = DataSource::open(&config(temp_dir.path(), 4)).unwrap();

        let mut session = source.acquire("test");
        assert_eq!(session.steps_per_epoch().unwrap(), 2);
        assert_eq!(session.validation_steps().unwrap(), 1);

        let batches: Vec<_> = session
            .train_epoch()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 4));
    }

    #[test]
    fn test_epochs_restart_and_reshuffle() {
        let temp_dir = TempDir::new().unwrap();
        write_split_dataset(temp_dir.path(), 8, 2);
        let mut source = DataSource::open(&config(temp_dir.path(), 16)).unwrap();
        let mut session = source.acquire("test");

        let paths = |batches: Vec<Vec<ImageItem>>| -> Vec<String> {
            batches.into_iter().flatten().map(|item| item.path).collect()
        };

        let first = paths(session.train_epoch().unwrap().collect::<Result<_>>().unwrap());
        let second = paths(session.train_epoch().unwrap().collect::<Result<_>>().unwrap());

        assert_eq!(first.len(), 16);
        assert_eq!(second.len(), 16);
        assert_ne!(first, second);

        let mut a = first.clone();
        let mut b = second.clone();
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(session.epochs_started(), 2);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        write_split_dataset(temp_dir.path(), 2, 4);
        let mut source = DataSource::open(&config(temp_dir.path(), 4)).unwrap();

        let read = |source: &mut DataSource| -> Vec<String> {
            let session = source.acquire("validation");
            let batches = session.validation().unwrap().collect::<Result<Vec<_>>>().unwrap();
            batches.into_iter().flatten().map(|item| item.path).collect()
        };

        let first = read(&mut source);
        let second = read(&mut source);
        assert_eq!(first.len(), 8);
        assert_eq!(first, second);
    }

    #[test]
    fn test_same_seed_same_order() {
        let temp_dir = TempDir::new().unwrap();
        write_split_dataset(temp_dir.path(), 6, 2);

        let order = || -> Vec<String> {
            let mut source = DataSource::open(&config(temp_dir.path(), 4)).unwrap();
            let mut session = source.acquire("test");
            let batches = session.train_epoch().unwrap().collect::<Result<Vec<_>>>().unwrap();
            batches.into_iter().flatten().map(|item| item.path).collect()
        };

        assert_eq!(order(), order());
    }

    #[test]
    fn test_too_few_validation_images() {
        let temp_dir = TempDir::new().unwrap();
        write_split_dataset(temp_dir.path(), 4, 1);
        let source = DataSource::open(&config(temp_dir.path(), 4)).unwrap();

        assert!(source.steps_per_epoch().is_ok());
        assert!(matches!(
            source.validation_steps(),
            Err(ClassifierError::DegenerateSteps { .. })
        ));
    }
}
