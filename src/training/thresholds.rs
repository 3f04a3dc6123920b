//! Per-class decision threshold calibration

use super::evaluation::precision_recall_curve;
use ndarray::Array2;
use std::collections::BTreeMap;
use tracing::debug;

/// Threshold used for classes without positive validation support
pub const DEFAULT_THRESHOLD: f64 = 0.5;

const F1_EPSILON: f64 = 1e-8;

/// Threshold maximising `2PR / (P + R + eps)` on the one-vs-rest curve.
/// Ties resolve to the lowest threshold.
pub fn best_f1_threshold(positive: &[bool], scores: &[f64]) -> f64 {
    let Some(curve) = precision_recall_curve(positive, scores) else {
        return DEFAULT_THRESHOLD;
    };

    let mut best: Option<(usize, f64)> = None;
    for (i, (p, r)) in curve.precision.iter().zip(&curve.recall).enumerate() {
        let f1 = 2.0 * p * r / (p + r + F1_EPSILON);
        if best.map_or(true, |(_, score)| f1 > score) {
            best = Some((i, f1));
        }
    }

    best.and_then(|(i, _)| curve.thresholds.get(i).copied())
        .unwrap_or(DEFAULT_THRESHOLD)
        .clamp(0.0, 1.0)
}

/// Calibrate one threshold per class index from validation probabilities
pub fn optimize_thresholds(y_true: &[usize], proba: &Array2<f64>) -> BTreeMap<usize, f64> {
    (0..proba.ncols())
        .map(|class| {
            let positive: Vec<bool> = y_true.iter().map(|&t| t == class).collect();
            let scores = proba.column(class).to_vec();
            let threshold = best_f1_threshold(&positive, &scores);
            debug!(class = class, threshold = threshold, "Calibrated threshold");
            (class, threshold)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_threshold_separates_classes() {
        let positive = [false, false, true, true];
        let scores = [0.1, 0.2, 0.7, 0.9];
        assert_eq!(best_f1_threshold(&positive, &scores), 0.7);
    }

    #[test]
    fn test_class_without_support_defaults() {
        let y_true = [0, 0, 1];
        let proba = array![[0.9, 0.05, 0.05], [0.8, 0.1, 0.1], [0.2, 0.7, 0.1]];
        let thresholds = optimize_thresholds(&y_true, &proba);

        assert_eq!(thresholds.len(), 3);
        assert_eq!(thresholds[&2], DEFAULT_THRESHOLD);
        for value in thresholds.values() {
            assert!((0.0..=1.0).contains(value));
        }
    }
}
