//! Multi-class learners and model artifact persistence

pub mod boosting;
pub mod loader;
pub mod softmax;
pub mod tree;

pub use boosting::GradientBoosting;
pub use loader::{ModelArtifact, PreprocessingBundle};
pub use softmax::SoftmaxRegression;

use crate::config::TrainingConfig;
use crate::error::{PipelineError, Result};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Learner families available to the trainer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnerType {
    GradientBoosting,
    SoftmaxRegression,
}

impl LearnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearnerType::GradientBoosting => "gradient_boosting",
            LearnerType::SoftmaxRegression => "softmax_regression",
        }
    }
}

impl fmt::Display for LearnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation rows used for early stopping
pub type EvalSet<'a> = (ArrayView2<'a, f32>, &'a [usize]);

/// Common interface for multi-class probabilistic learners.
///
/// `x` is row-major with one row per sample; `y` holds class indices in
/// `0..n_classes`.
pub trait Learner: Send + Sync {
    /// Learner family
    fn kind(&self) -> LearnerType;

    /// Fit on training rows, early-stopping against `eval_set` when given
    fn fit(
        &mut self,
        x: ArrayView2<f32>,
        y: &[usize],
        n_classes: usize,
        eval_set: Option<EvalSet<'_>>,
    ) -> Result<()>;

    /// Class probabilities, one row per sample; each row sums to 1
    fn predict_proba(&self, x: ArrayView2<f32>) -> Result<Array2<f64>>;

    /// Most probable class per sample
    fn predict(&self, x: ArrayView2<f32>) -> Result<Vec<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba.rows().into_iter().map(|row| argmax(row.iter().copied())).collect())
    }

    /// Normalised per-feature importances, when the learner has them
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    /// Input width the learner was fitted on (0 before fit)
    fn n_features(&self) -> usize;

    /// Number of classes (0 before fit)
    fn n_classes(&self) -> usize;

    fn is_fitted(&self) -> bool {
        self.n_classes() > 0
    }
}

/// Serializable fitted learner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrainedLearner {
    GradientBoosting(GradientBoosting),
    SoftmaxRegression(SoftmaxRegression),
}

impl TrainedLearner {
    /// Create an unfitted learner of the given family
    pub fn new(kind: LearnerType, config: &TrainingConfig) -> Self {
        match kind {
            LearnerType::GradientBoosting => TrainedLearner::GradientBoosting(
                GradientBoosting::new(config.boosting.clone(), config.seed),
            ),
            LearnerType::SoftmaxRegression => {
                TrainedLearner::SoftmaxRegression(SoftmaxRegression::new(config.softmax.clone()))
            }
        }
    }

    pub fn as_learner(&self) -> &dyn Learner {
        match self {
            TrainedLearner::GradientBoosting(model) => model,
            TrainedLearner::SoftmaxRegression(model) => model,
        }
    }

    pub fn as_learner_mut(&mut self) -> &mut dyn Learner {
        match self {
            TrainedLearner::GradientBoosting(model) => model,
            TrainedLearner::SoftmaxRegression(model) => model,
        }
    }
}

/// Index of the largest value; first wins on ties
pub fn argmax(values: impl IntoIterator<Item = f64>) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, value) in values.into_iter().enumerate() {
        if value > best.1 {
            best = (i, value);
        }
    }
    best.0
}

/// In-place numerically stable softmax
pub(crate) fn softmax_in_place(logits: &mut [f64]) {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for value in logits.iter_mut() {
        *value = (*value - max).exp();
        sum += *value;
    }
    for value in logits.iter_mut() {
        *value /= sum;
    }
}

/// Mean multi-class log-loss
pub(crate) fn log_loss(proba: &Array2<f64>, y: &[usize]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let total: f64 = y
        .iter()
        .enumerate()
        .map(|(row, &class)| -proba[[row, class]].max(1e-15).ln())
        .sum();
    total / y.len() as f64
}

pub(crate) fn check_width(expected: usize, x: &ArrayView2<f32>) -> Result<()> {
    if x.ncols() != expected {
        return Err(PipelineError::InvalidInput {
            path: "feature matrix".to_string(),
            reason: format!("expected {} features, got {}", expected, x.ncols()),
        });
    }
    Ok(())
}
