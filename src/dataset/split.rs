//! Seeded train/validation split

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SentinelError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of items held out for validation
    pub validation_fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.1,
            seed: 42,
        }
    }
}

/// Shuffle deterministically and split into (train, validation).
///
/// The validation share is rounded up, and both sides get at least one
/// item whenever there are two or more items and the fraction is non-zero.
pub fn train_val_split<T>(items: Vec<T>, config: &SplitConfig) -> Result<(Vec<T>, Vec<T>)> {
    if items.is_empty() {
        return Err(SentinelError::Data("no samples provided for splitting".into()));
    }
    if !(0.0..1.0).contains(&config.validation_fraction) {
        return Err(SentinelError::Configuration(format!(
            "validation_fraction must be in [0.0, 1.0), got {}",
            config.validation_fraction
        )));
    }

    let total = items.len();
    let mut n_val = (total as f64 * config.validation_fraction).ceil() as usize;
    if config.validation_fraction > 0.0 && total >= 2 {
        n_val = n_val.clamp(1, total - 1);
    } else {
        n_val = n_val.min(total.saturating_sub(1));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut items = items;
    items.shuffle(&mut rng);

    let train = items.split_off(n_val);
    Ok((train, items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ninety_ten_split() {
        let (train, val) = train_val_split((0..100).collect::<Vec<_>>(), &SplitConfig::default()).unwrap();
        assert_eq!(train.len(), 90);
        assert_eq!(val.len(), 10);

        let mut all: Vec<_> = train.iter().chain(val.iter()).copied().collect();
        all.sort();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_reproducibility() {
        let config = SplitConfig {
            validation_fraction: 0.25,
            seed: 7,
        };
        let a = train_val_split((0..40).collect::<Vec<_>>(), &config).unwrap();
        let b = train_val_split((0..40).collect::<Vec<_>>(), &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_small_sets_keep_both_sides() {
        let (train, val) = train_val_split(vec![1, 2, 3], &SplitConfig::default()).unwrap();
        assert_eq!((train.len(), val.len()), (2, 1));

        let (train, val) = train_val_split(vec![1], &SplitConfig::default()).unwrap();
        assert_eq!((train.len(), val.len()), (1, 0));
    }

    #[test]
    fn test_empty_input_is_data_error() {
        let err = train_val_split(Vec::<u8>::new(), &SplitConfig::default()).unwrap_err();
        assert!(matches!(err, SentinelError::Data(_)));
    }
}
