//! Metrics Module for Change-Mask Evaluation
//!
//! Pixel-level binary metrics (precision, recall, F1, accuracy) computed
//! from a confusion count, and an accumulator that averages them across
//! batches for the epoch-level report.

use serde::{Deserialize, Serialize};

/// Pixel confusion counts for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelCounts {
    pub true_positives: f64,
    pub false_positives: f64,
    pub false_negatives: f64,
    pub true_negatives: f64,
}

impl PixelCounts {
    /// Count from binarized predictions and targets of equal length
    pub fn from_masks(predicted: &[bool], target: &[bool]) -> Self {
        let mut counts = Self::default();
        for (&p, &t) in predicted.iter().zip(target.iter()) {
            match (p, t) {
                (true, true) => counts.true_positives += 1.0,
                (true, false) => counts.false_positives += 1.0,
                (false, true) => counts.false_negatives += 1.0,
                (false, false) => counts.true_negatives += 1.0,
            }
        }
        counts
    }

    pub fn total(&self) -> f64 {
        self.true_positives + self.false_positives + self.false_negatives + self.true_negatives
    }
}

/// Binary segmentation metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BinaryMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    /// Intersection over union of the change class
    #[serde(default)]
    pub iou: f64,
}

impl BinaryMetrics {
    /// Ratios with an empty denominator are reported as 0.0
    pub fn from_counts(c: &PixelCounts) -> Self {
        let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };

        let precision = ratio(c.true_positives, c.true_positives + c.false_positives);
        let recall = ratio(c.true_positives, c.true_positives + c.false_negatives);
        let f1 = ratio(2.0 * precision * recall, precision + recall);
        let accuracy = ratio(c.true_positives + c.true_negatives, c.total());
        let iou = ratio(
            c.true_positives,
            c.true_positives + c.false_positives + c.false_negatives,
        );

        Self {
            precision,
            recall,
            f1,
            accuracy,
            iou,
        }
    }
}

/// Running mean of per-batch loss and metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    loss_sum: f64,
    precision_sum: f64,
    recall_sum: f64,
    f1_sum: f64,
    accuracy_sum: f64,
    iou_sum: f64,
    batches: usize,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, loss: f64, metrics: &BinaryMetrics) {
        self.loss_sum += loss;
        self.precision_sum += metrics.precision;
        self.recall_sum += metrics.recall;
        self.f1_sum += metrics.f1;
        self.accuracy_sum += metrics.accuracy;
        self.iou_sum += metrics.iou;
        self.batches += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Average loss over the pushed batches (0.0 when empty)
    pub fn mean_loss(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.loss_sum / self.batches as f64
        }
    }

    /// Batch-averaged metrics
    pub fn mean_metrics(&self) -> BinaryMetrics {
        if self.batches == 0 {
            return BinaryMetrics::default();
        }
        let n = self.batches as f64;
        BinaryMetrics {
            precision: self.precision_sum / n,
            recall: self.recall_sum / n,
            f1: self.f1_sum / n,
            accuracy: self.accuracy_sum / n,
            iou: self.iou_sum / n,
        }
    }
}
