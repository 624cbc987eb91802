//! Data augmentation for training batches
//!
//! Augmentations operate on preprocessed CHW float images in [0, 1], so they
//! apply equally to cached and lazily loaded items.
//!
//! - **Training**: random horizontal flip and brightness jitter
//! - **Validation**: never augmented

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Probability of applying horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Brightness adjustment range (±brightness_delta)
    pub brightness_delta: f32,
    /// Probability of applying brightness adjustment
    pub brightness_prob: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            brightness_delta: 0.1,
            brightness_prob: 0.3,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            brightness_delta: 0.0,
            brightness_prob: 0.0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.horizontal_flip_prob > 0.0 || (self.brightness_prob > 0.0 && self.brightness_delta > 0.0)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, p) in [
            ("horizontal_flip_prob", self.horizontal_flip_prob),
            ("brightness_prob", self.brightness_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("{} must be in [0, 1], got {}", name, p));
            }
        }
        if !(0.0..=1.0).contains(&self.brightness_delta) {
            return Err(format!(
                "brightness_delta must be in [0, 1], got {}",
                self.brightness_delta
            ));
        }
        Ok(())
    }
}

/// Applies random transformations to square CHW images
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: usize,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, image_size: usize) -> Self {
        Self { config, image_size }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Augment `image` (`3 * size * size` values) in place
    pub fn augment(&self, image: &mut [f32], rng: &mut ChaCha8Rng) {
        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            self.flip_horizontal(image);
        }

        if self.config.brightness_prob > 0.0 && rng.gen::<f32>() < self.config.brightness_prob {
            let delta =
                rng.gen_range(-self.config.brightness_delta..=self.config.brightness_delta);
            Self::adjust_brightness(image, delta);
        }
    }

    /// Mirror every row of every channel
    pub fn flip_horizontal(&self, image: &mut [f32]) {
        for row in image.chunks_mut(self.image_size) {
            row.reverse();
        }
    }

    /// Shift all values by `delta`, clamped to [0, 1]
    pub fn adjust_brightness(image: &mut [f32], delta: f32) {
        for value in image.iter_mut() {
            *value = (*value + delta).clamp(0.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn gradient(size: usize) -> Vec<f32> {
        (0..3 * size * size)
            .map(|i| (i % size) as f32 / size as f32)
            .collect()
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: AugmentationConfig =
            serde_json::from_str(r#"{"horizontal_flip_prob": 0.0}"#).unwrap();
        assert_eq!(config.horizontal_flip_prob, 0.0);
        assert_eq!(config.brightness_delta, 0.1);
        assert_eq!(config.brightness_prob, 0.3);
        assert!(config.is_enabled());
    }

    #[test]
    fn test_flip_reverses_rows() {
        let augmenter = Augmenter::new(AugmentationConfig::default(), 4);
        let mut image = gradient(4);
        augmenter.flip_horizontal(&mut image);

        assert_eq!(&image[..4], &[0.75, 0.5, 0.25, 0.0]);
        assert_eq!(image.len(), 48);
    }

    #[test]
    fn test_flip_twice_is_identity() {
        let augmenter = Augmenter::new(AugmentationConfig::default(), 8);
        let original = gradient(8);
        let mut image = original.clone();
        augmenter.flip_horizontal(&mut image);
        augmenter.flip_horizontal(&mut image);
        assert_eq!(image, original);
    }

    #[test]
    fn test_brightness_is_clamped() {
        let mut image = vec![0.0, 0.5, 0.95];
        Augmenter::adjust_brightness(&mut image, 0.1);
        assert!((image[1] - 0.6).abs() < 1e-6);
        assert_eq!(image[2], 1.0);

        Augmenter::adjust_brightness(&mut image, -0.5);
        assert_eq!(image[0], 0.0);
    }

    #[test]
    fn test_none_leaves_image_untouched() {
        let augmenter = Augmenter::new(AugmentationConfig::none(), 4);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let original = gradient(4);
        let mut image = original.clone();

        for _ in 0..10 {
            augmenter.augment(&mut image, &mut rng);
        }
        assert_eq!(image, original);
        assert!(!augmenter.config().is_enabled());
    }

    #[test]
    fn test_same_seed_same_augmentation() {
        let augmenter = Augmenter::new(AugmentationConfig::default(), 4);
        let mut a = gradient(4);
        let mut b = gradient(4);

        augmenter.augment(&mut a, &mut ChaCha8Rng::seed_from_u64(42));
        augmenter.augment(&mut b, &mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate_rejects_bad_probability() {
        let config = AugmentationConfig {
            horizontal_flip_prob: 1.5,
            ..AugmentationConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(AugmentationConfig::default().validate().is_ok());
    }
}
