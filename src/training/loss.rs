//! Segmentation loss and tensor metrics
//!
//! Loss = bce_weight · BCE(logits, mask) + dice_weight · (1 - soft Dice).
//! With both weights at 1.0 this is the plain sum of the two terms.

use burn::tensor::{activation::sigmoid, backend::Backend, ElementConversion, Tensor};

use crate::utils::metrics::PixelCounts;

/// Numerically stable binary cross-entropy on logits, averaged over pixels:
/// `max(x, 0) - x·y + ln(1 + e^-|x|)`
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
    let positive = logits.clone().clamp_min(0.0);
    let cross = logits.clone() * targets;
    let soft = logits.abs().neg().exp().log1p();
    (positive - cross + soft).mean()
}

/// Soft Dice loss averaged over samples:
/// `1 - (2·Σpy + ε) / (Σp + Σy + ε)`
pub fn soft_dice_loss<B: Backend>(probs: Tensor<B, 4>, targets: Tensor<B, 4>, epsilon: f64) -> Tensor<B, 1> {
    let [n, c, h, w] = probs.dims();
    let p = probs.reshape([n, c * h * w]);
    let y = targets.reshape([n, c * h * w]);

    let intersection = (p.clone() * y.clone()).sum_dim(1);
    let denominator = p.sum_dim(1) + y.sum_dim(1);
    let dice = (intersection.mul_scalar(2.0).add_scalar(epsilon)) / denominator.add_scalar(epsilon);

    dice.neg().add_scalar(1.0).mean()
}

/// Weighted BCE + Dice loss
#[derive(Debug, Clone, Copy)]
pub struct ChangeLoss {
    pub bce_weight: f64,
    pub dice_weight: f64,
    pub dice_epsilon: f64,
}

impl Default for ChangeLoss {
    fn default() -> Self {
        Self {
            bce_weight: 1.0,
            dice_weight: 1.0,
            dice_epsilon: 1e-6,
        }
    }
}

impl ChangeLoss {
    /// Scalar loss from logits [N, 1, S, S] and binary masks of the same shape
    pub fn forward<B: Backend>(&self, logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        let probs = sigmoid(logits.clone());
        let bce = bce_with_logits(logits, targets.clone());
        let dice = soft_dice_loss(probs, targets, self.dice_epsilon);
        bce.mul_scalar(self.bce_weight) + dice.mul_scalar(self.dice_weight)
    }
}

/// Confusion counts of probabilities binarized at `threshold` against masks
pub fn pixel_counts<B: Backend>(probs: Tensor<B, 4>, targets: Tensor<B, 4>, threshold: f64) -> PixelCounts {
    let total = probs.dims().iter().product::<usize>() as f64;
    let predicted = probs.greater_elem(threshold).float();
    let actual = targets.greater_elem(0.5).float();

    let tp: f64 = (predicted.clone() * actual.clone()).sum().into_scalar().elem();
    let predicted_pos: f64 = predicted.sum().into_scalar().elem();
    let actual_pos: f64 = actual.sum().into_scalar().elem();

    let fp = predicted_pos - tp;
    let fn_ = actual_pos - tp;
    PixelCounts {
        true_positives: tp,
        false_positives: fp,
        false_negatives: fn_,
        true_negatives: total - tp - fp - fn_,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn tensor(values: Vec<f32>, shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::from_floats(TensorData::new(values, shape), &Default::default())
    }

    fn scalar(t: Tensor<TestBackend, 1>) -> f64 {
        t.into_scalar().elem()
    }

    #[test]
    fn test_bce_matches_closed_form() {
        let logits = tensor(vec![0.0, 2.0, -3.0, 1.5], [1, 1, 2, 2]);
        let targets = tensor(vec![1.0, 0.0, 0.0, 1.0], [1, 1, 2, 2]);

        let expected: f64 = [(0.0f64, 1.0f64), (2.0, 0.0), (-3.0, 0.0), (1.5, 1.0)]
            .iter()
            .map(|&(x, y)| {
                let p = 1.0 / (1.0 + (-x).exp());
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            })
            .sum::<f64>()
            / 4.0;

        let got = scalar(bce_with_logits(logits, targets));
        assert!((got - expected).abs() < 1e-5, "{} vs {}", got, expected);
    }

    #[test]
    fn test_bce_stable_for_large_logits() {
        let logits = tensor(vec![80.0, -80.0], [1, 1, 1, 2]);
        let targets = tensor(vec![1.0, 0.0], [1, 1, 1, 2]);
        let got = scalar(bce_with_logits(logits, targets));
        assert!(got.is_finite());
        assert!(got < 1e-6);
    }

    #[test]
    fn test_dice_perfect_and_disjoint() {
        let mask = tensor(vec![1.0, 0.0, 1.0, 0.0], [1, 1, 2, 2]);
        let perfect = scalar(soft_dice_loss(mask.clone(), mask.clone(), 1e-6));
        assert!(perfect.abs() < 1e-6);

        let inverse = tensor(vec![0.0, 1.0, 0.0, 1.0], [1, 1, 2, 2]);
        let disjoint = scalar(soft_dice_loss(inverse, mask, 1e-6));
        assert!((disjoint - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dice_empty_masks_is_zero_loss() {
        let zeros = tensor(vec![0.0; 4], [1, 1, 2, 2]);
        let got = scalar(soft_dice_loss(zeros.clone(), zeros, 1e-6));
        assert!(got.abs() < 1e-6);
    }

    #[test]
    fn test_weighted_sum() {
        let logits = tensor(vec![0.3, -1.0, 2.0, 0.0], [1, 1, 2, 2]);
        let targets = tensor(vec![1.0, 0.0, 1.0, 0.0], [1, 1, 2, 2]);

        let bce = scalar(bce_with_logits(logits.clone(), targets.clone()));
        let dice = scalar(soft_dice_loss(sigmoid(logits.clone()), targets.clone(), 1e-6));

        let plain = scalar(ChangeLoss::default().forward(logits.clone(), targets.clone()));
        assert!((plain - (bce + dice)).abs() < 1e-5);

        let weighted = ChangeLoss {
            bce_weight: 0.5,
            dice_weight: 2.0,
            dice_epsilon: 1e-6,
        };
        let got = scalar(weighted.forward(logits, targets));
        assert!((got - (0.5 * bce + 2.0 * dice)).abs() < 1e-5);
    }

    #[test]
    fn test_pixel_counts() {
        let probs = tensor(vec![0.9, 0.6, 0.4, 0.1, 0.5, 0.51], [1, 1, 2, 3]);
        let targets = tensor(vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0], [1, 1, 2, 3]);
        let c = pixel_counts(probs, targets, 0.5);
        assert_eq!(c.true_positives, 2.0);
        assert_eq!(c.false_positives, 1.0);
        assert_eq!(c.false_negatives, 2.0);
        assert_eq!(c.true_negatives, 1.0);
    }
}
