//! Classification metrics and precision-recall curves

use crate::models::argmax;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One-vs-rest precision-recall curve.
///
/// Points are ordered by increasing threshold and the curve ends with
/// the `(precision = 1, recall = 0)` anchor, which has no threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct PrCurve {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub thresholds: Vec<f64>,
}

/// Precision-recall curve over the distinct scores. Returns `None` when
/// there are no positives.
pub fn precision_recall_curve(positive: &[bool], scores: &[f64]) -> Option<PrCurve> {
    let total_positive = positive.iter().filter(|&&p| p).count();
    if total_positive == 0 || positive.len() != scores.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    // (threshold, precision, recall) by decreasing threshold, up to full recall
    let mut points: Vec<(f64, f64, f64)> = Vec::new();
    let (mut tp, mut fp) = (0usize, 0usize);
    for (position, &row) in order.iter().enumerate() {
        if positive[row] {
            tp += 1;
        } else {
            fp += 1;
        }

        let last_of_block = order
            .get(position + 1)
            .map_or(true, |&next| scores[next] != scores[row]);
        if last_of_block {
            points.push((
                scores[row],
                tp as f64 / (tp + fp) as f64,
                tp as f64 / total_positive as f64,
            ));
            if tp == total_positive {
                break;
            }
        }
    }

    points.reverse();
    let mut curve = PrCurve {
        precision: points.iter().map(|p| p.1).collect(),
        recall: points.iter().map(|p| p.2).collect(),
        thresholds: points.iter().map(|p| p.0).collect(),
    };
    curve.precision.push(1.0);
    curve.recall.push(0.0);
    Some(curve)
}

/// Trapezoidal area under the precision-recall curve
pub fn pr_auc(curve: &PrCurve) -> f64 {
    curve
        .recall
        .windows(2)
        .zip(curve.precision.windows(2))
        .map(|(r, p)| (r[0] - r[1]).abs() * (p[0] + p[1]) / 2.0)
        .sum()
}

/// Per-class entry of the classification report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Held-out evaluation of one learner; a metric that cannot be computed
/// is `None`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy: Option<f64>,
    pub macro_f1: Option<f64>,
    pub weighted_f1: Option<f64>,
    pub macro_precision: Option<f64>,
    pub macro_recall: Option<f64>,
    pub macro_pr_auc: Option<f64>,
    pub per_class_pr_auc: BTreeMap<String, Option<f64>>,
    pub classification_report: BTreeMap<String, ClassReport>,
}

impl EvaluationMetrics {
    /// Every metric null, for a learner whose evaluation could not run
    pub fn unavailable() -> Self {
        Self {
            accuracy: None,
            macro_f1: None,
            weighted_f1: None,
            macro_precision: None,
            macro_recall: None,
            macro_pr_auc: None,
            per_class_pr_auc: BTreeMap::new(),
            classification_report: BTreeMap::new(),
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Evaluate class probabilities against true class indices
pub fn evaluate(y_true: &[usize], proba: &Array2<f64>, labels: &[String]) -> EvaluationMetrics {
    let n_classes = labels.len();
    let predicted: Vec<usize> = proba
        .rows()
        .into_iter()
        .map(|row| argmax(row.iter().copied()))
        .collect();

    let mut true_positive = vec![0usize; n_classes];
    let mut predicted_count = vec![0usize; n_classes];
    let mut support = vec![0usize; n_classes];
    for (&truth, &guess) in y_true.iter().zip(&predicted) {
        support[truth] += 1;
        predicted_count[guess] += 1;
        if truth == guess {
            true_positive[truth] += 1;
        }
    }

    let mut report = BTreeMap::new();
    let (mut precisions, mut recalls, mut f1s) = (Vec::new(), Vec::new(), Vec::new());
    let mut weighted_f1 = 0.0;
    for (class, label) in labels.iter().enumerate() {
        let precision = ratio(true_positive[class], predicted_count[class]);
        let recall = ratio(true_positive[class], support[class]);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        // macro averages skip labels absent from both truth and predictions
        if support[class] > 0 || predicted_count[class] > 0 {
            precisions.push(precision);
            recalls.push(recall);
            f1s.push(f1);
        }
        weighted_f1 += f1 * support[class] as f64;
        report.insert(
            label.clone(),
            ClassReport {
                precision,
                recall,
                f1_score: f1,
                support: support[class],
            },
        );
    }

    let mut per_class_pr_auc = BTreeMap::new();
    let mut aucs = Vec::new();
    for (class, label) in labels.iter().enumerate() {
        let positive: Vec<bool> = y_true.iter().map(|&t| t == class).collect();
        let scores: Vec<f64> = proba.column(class).to_vec();
        let auc = precision_recall_curve(&positive, &scores).map(|curve| pr_auc(&curve));
        if let Some(value) = auc {
            aucs.push(value);
        }
        per_class_pr_auc.insert(label.clone(), auc);
    }

    let n = y_true.len();
    let correct: usize = true_positive.iter().sum();
    let (accuracy, weighted_f1) = if n == 0 {
        (None, None)
    } else {
        (Some(correct as f64 / n as f64), Some(weighted_f1 / n as f64))
    };
    let has_rows = n > 0;

    EvaluationMetrics {
        accuracy,
        macro_f1: mean(&f1s).filter(|_| has_rows),
        weighted_f1,
        macro_precision: mean(&precisions).filter(|_| has_rows),
        macro_recall: mean(&recalls).filter(|_| has_rows),
        macro_pr_auc: mean(&aucs),
        per_class_pr_auc,
        classification_report: report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_pr_curve_shape() {
        let positive = [false, false, true, true];
        let scores = [0.1, 0.4, 0.35, 0.8];
        let curve = precision_recall_curve(&positive, &scores).unwrap();

        assert_eq!(curve.thresholds, vec![0.35, 0.4, 0.8]);
        assert_eq!(curve.recall, vec![1.0, 0.5, 0.5, 0.0]);
        assert!((curve.precision[0] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(curve.precision[1], 0.5);
        assert_eq!(curve.precision[2], 1.0);
        assert_eq!(curve.precision[3], 1.0);
    }

    #[test]
    fn test_perfect_ranking_has_unit_auc() {
        let positive = [false, true, false, true];
        let scores = [0.1, 0.9, 0.2, 0.8];
        let curve = precision_recall_curve(&positive, &scores).unwrap();
        assert!((pr_auc(&curve) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_positives_has_no_curve() {
        assert!(precision_recall_curve(&[false, false], &[0.3, 0.6]).is_none());
    }

    #[test]
    fn test_evaluate_metrics() {
        let labels = vec!["battery".to_string(), "none".to_string()];
        let y_true = [0, 0, 1, 1];
        let proba = array![[0.9, 0.1], [0.4, 0.6], [0.2, 0.8], [0.3, 0.7]];

        let metrics = evaluate(&y_true, &proba, &labels);
        assert_eq!(metrics.accuracy, Some(0.75));

        let battery = &metrics.classification_report["battery"];
        assert_eq!(battery.precision, 1.0);
        assert_eq!(battery.recall, 0.5);
        assert_eq!(battery.support, 2);

        let none = &metrics.classification_report["none"];
        assert!((none.precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(none.recall, 1.0);
        assert!(metrics.macro_pr_auc.is_some());
    }

    #[test]
    fn test_missing_class_excluded_from_pr_auc() {
        let labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let y_true = [0, 1];
        let proba = array![[0.8, 0.1, 0.1], [0.1, 0.8, 0.1]];

        let metrics = evaluate(&y_true, &proba, &labels);
        assert_eq!(metrics.per_class_pr_auc["c"], None);
        assert_eq!(metrics.macro_pr_auc, Some(1.0));
        // zero-support class scores zero
        assert_eq!(metrics.classification_report["c"].f1_score, 0.0);
    }

    #[test]
    fn test_macro_average_over_present_labels() {
        let labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let y_true = [0, 0, 1];
        // "c" is neither a truth nor a prediction
        let proba = array![[0.8, 0.1, 0.1], [0.2, 0.7, 0.1], [0.1, 0.8, 0.1]];

        let metrics = evaluate(&y_true, &proba, &labels);
        // a: p=1, r=0.5, f1=2/3; b: p=0.5, r=1, f1=2/3
        assert!((metrics.macro_precision.unwrap() - 0.75).abs() < 1e-12);
        assert!((metrics.macro_recall.unwrap() - 0.75).abs() < 1e-12);
        assert!((metrics.macro_f1.unwrap() - 2.0 / 3.0).abs() < 1e-12);

        // a label predicted but never true still counts
        let proba = array![[0.1, 0.1, 0.8], [0.8, 0.1, 0.1], [0.1, 0.8, 0.1]];
        let metrics = evaluate(&y_true, &proba, &labels);
        // a: p=1, r=0.5; b: p=1, r=1; c: p=0, r=0
        assert!((metrics.macro_precision.unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.macro_recall.unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_unavailable_metrics_are_null() {
        let metrics = EvaluationMetrics::unavailable();
        assert_eq!(metrics.accuracy, None);
        assert_eq!(metrics.macro_pr_auc, None);
        assert!(metrics.classification_report.is_empty());
    }
}
