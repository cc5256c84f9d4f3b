//! Classification metrics
//!
//! Accuracy is categorical (argmax against the label). Precision and recall
//! are micro-averaged over one-hot targets, counting a class as predicted
//! when its probability exceeds [`DEFAULT_THRESHOLD`].

use serde::{Deserialize, Serialize};

/// Probability above which a class counts as predicted positive
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Running counts accumulated batch by batch during evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationCounts {
    pub samples: usize,
    pub correct: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl ClassificationCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with a batch of row-major probabilities `[labels.len(), num_classes]`
    pub fn update(&mut self, probabilities: &[f32], labels: &[usize], num_classes: usize) {
        debug_assert_eq!(probabilities.len(), labels.len() * num_classes);

        for (row, &label) in probabilities.chunks(num_classes).zip(labels) {
            self.samples += 1;
            if argmax(row) == Some(label) {
                self.correct += 1;
            }

            for (class, &p) in row.iter().enumerate() {
                let predicted = p > DEFAULT_THRESHOLD;
                let actual = class == label;
                match (predicted, actual) {
                    (true, true) => self.true_positives += 1,
                    (true, false) => self.false_positives += 1,
                    (false, true) => self.false_negatives += 1,
                    (false, false) => {}
                }
            }
        }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.samples)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Finish with the mean loss computed by the caller
    pub fn finish(&self, loss: f64) -> EvaluationMetrics {
        EvaluationMetrics {
            loss,
            accuracy: self.accuracy(),
            precision: self.precision(),
            recall: self.recall(),
            samples: self.samples,
        }
    }
}

/// Metrics reported by an evaluation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvaluationMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub samples: usize,
}

impl std::fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Loss:      {:.4}", self.loss)?;
        writeln!(f, "Accuracy:  {:.4}", self.accuracy)?;
        writeln!(f, "Precision: {:.4}", self.precision)?;
        write!(f, "Recall:    {:.4}", self.recall)
    }
}

/// Index of the largest value; the first one wins on ties
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_counts_accuracy_precision_recall() {
        let mut counts = ClassificationCounts::new();
        // sample 0: confident and correct
        // sample 1: correct by argmax but below threshold
        // sample 2: confident and wrong
        let probs = [
            0.9, 0.05, 0.05, //
            0.2, 0.45, 0.35, //
            0.1, 0.1, 0.8,
        ];
        counts.update(&probs, &[0, 1, 0], 3);

        assert_eq!(counts.samples, 3);
        assert_eq!(counts.correct, 2);
        assert_eq!(counts.true_positives, 1);
        assert_eq!(counts.false_positives, 1);
        assert_eq!(counts.false_negatives, 2);

        assert!((counts.accuracy() - 2.0 / 3.0).abs() < 1e-9);
        assert!((counts.precision() - 0.5).abs() < 1e-9);
        assert!((counts.recall() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_counts_are_zero() {
        let metrics = ClassificationCounts::new().finish(0.0);
        assert_eq!(metrics.accuracy, 0.0);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.recall, 0.0);
        assert_eq!(metrics.samples, 0);
    }

    #[test]
    fn test_updates_accumulate_across_batches() {
        let mut counts = ClassificationCounts::new();
        counts.update(&[0.8, 0.2], &[0], 2);
        counts.update(&[0.3, 0.7], &[1], 2);
        let metrics = counts.finish(0.25);
        assert_eq!(metrics.samples, 2);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.precision, 1.0);
        assert_eq!(metrics.recall, 1.0);
        assert_eq!(metrics.loss, 0.25);
    }
}
