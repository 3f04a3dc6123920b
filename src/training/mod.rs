//! Model training: data preparation, splitting, fitting, evaluation,
//! threshold calibration and model selection.

pub mod evaluation;
pub mod scaler;
pub mod split;
pub mod thresholds;

pub use evaluation::{evaluate, EvaluationMetrics};
pub use scaler::RobustScaler;
pub use split::stratified_split;
pub use thresholds::optimize_thresholds;

use crate::config::TrainingConfig;
use crate::error::{PipelineError, Result};
use crate::features::{FeatureFrame, LabelEncoder};
use crate::models::{LearnerType, TrainedLearner};
use chrono::{DateTime, Utc};
use ndarray::{s, Array2};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

/// Scaled feature matrix and encoded targets
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub x: Array2<f32>,
    pub y: Vec<usize>,
    pub target_encoder: LabelEncoder,
    pub scaler: RobustScaler,
    pub feature_columns: Vec<String>,
}

impl PreparedData {
    pub fn n_rows(&self) -> usize {
        self.y.len()
    }

    pub fn classes(&self) -> &[String] {
        self.target_encoder.classes()
    }
}

/// Row indices of the train / validation / test splits
#[derive(Debug, Clone, PartialEq)]
pub struct DataSplits {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

/// A fitted learner with its held-out evaluation
#[derive(Debug, Clone)]
pub struct TrainedCandidate {
    pub learner: TrainedLearner,
    pub metrics: EvaluationMetrics,
    /// Thresholds calibrated on the validation split
    pub thresholds: BTreeMap<usize, f64>,
    pub trained_at: DateTime<Utc>,
    pub training_seconds: f64,
}

impl TrainedCandidate {
    pub fn kind(&self) -> LearnerType {
        self.learner.as_learner().kind()
    }
}

pub struct ModelTrainer {
    config: TrainingConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Project onto the fitted feature columns, encode targets and scale.
    ///
    /// The scaler is fitted on a prefix of `scaler_fit_rows` rows when the
    /// frame is larger than `partial_scaler_threshold`.
    pub fn prepare_data(&self, frame: FeatureFrame, feature_columns: &[String]) -> Result<PreparedData> {
        info!(rows = frame.n_rows(), "Preparing training data");

        let frame = frame.select(feature_columns)?;
        if frame.n_rows() == 0 {
            return Err(PipelineError::Training("no rows to train on".to_string()));
        }

        let target_encoder = LabelEncoder::fit(frame.targets().iter().map(String::as_str));
        if target_encoder.len() < 2 {
            return Err(PipelineError::Training(format!(
                "need at least two failure classes, found {:?}",
                target_encoder.classes()
            )));
        }
        let y: Vec<usize> = frame
            .targets()
            .iter()
            .filter_map(|label| target_encoder.index_of(label))
            .collect();

        let mut x = frame.to_matrix()?;
        drop(frame);

        let scaler = if x.nrows() > self.config.partial_scaler_threshold {
            let fit_rows = self.config.scaler_fit_rows.min(x.nrows());
            info!(
                rows = x.nrows(),
                fit_rows = fit_rows,
                "Large dataset, fitting scaler on a prefix"
            );
            RobustScaler::fit(x.slice(s![..fit_rows, ..]))
        } else {
            RobustScaler::fit(x.view())
        };
        scaler.transform(&mut x)?;

        let mut distribution: BTreeMap<&str, usize> = BTreeMap::new();
        for &class in &y {
            *distribution
                .entry(target_encoder.classes()[class].as_str())
                .or_insert(0) += 1;
        }
        info!(
            rows = x.nrows(),
            features = x.ncols(),
            classes = ?target_encoder.classes(),
            distribution = ?distribution,
            "Training data prepared"
        );

        Ok(PreparedData {
            x,
            y,
            target_encoder,
            scaler,
            feature_columns: feature_columns.to_vec(),
        })
    }

    /// Stratified outer test split, then an inner validation split of the
    /// remainder, both with the configured seed
    pub fn split(&self, y: &[usize]) -> DataSplits {
        let rows: Vec<usize> = (0..y.len()).collect();
        let outer = stratified_split(&rows, y, self.config.test_size, self.config.seed);
        let inner = stratified_split(&outer.train, y, self.config.validation_size, self.config.seed);

        info!(
            train = inner.train.len(),
            validation = inner.test.len(),
            test = outer.test.len(),
            "Data split"
        );

        DataSplits {
            train: inner.train,
            validation: inner.test,
            test: outer.test,
        }
    }

    /// Fit one learner with early stopping on validation, evaluate it on
    /// test and calibrate thresholds on validation
    pub fn train_candidate(
        &self,
        kind: LearnerType,
        data: &PreparedData,
        splits: &DataSplits,
    ) -> Result<TrainedCandidate> {
        info!(model = %kind, "Training model");
        let started = Instant::now();

        let x_train = take_rows(&data.x, &splits.train)?;
        let x_val = take_rows(&data.x, &splits.validation)?;
        let y_train = take_labels(&data.y, &splits.train);
        let y_val = take_labels(&data.y, &splits.validation);

        let mut learner = TrainedLearner::new(kind, &self.config);
        let eval_set = (!y_val.is_empty()).then(|| (x_val.view(), y_val.as_slice()));
        learner
            .as_learner_mut()
            .fit(x_train.view(), &y_train, data.target_encoder.len(), eval_set)?;
        drop(x_train);

        let trained_at = Utc::now();
        let training_seconds = started.elapsed().as_secs_f64();

        // the fitted learner survives a failed evaluation
        let (metrics, thresholds) = match assess(&learner, data, &splits.test, &x_val, &y_val) {
            Ok(assessed) => assessed,
            Err(e) => {
                warn!(model = %kind, error = %e, "Evaluation failed, keeping model with default thresholds");
                unassessed(data.target_encoder.len())
            }
        };

        info!(
            model = %kind,
            accuracy = ?metrics.accuracy,
            macro_f1 = ?metrics.macro_f1,
            macro_pr_auc = ?metrics.macro_pr_auc,
            training_seconds = training_seconds,
            "Model trained"
        );
        if metrics.macro_pr_auc.is_none() {
            warn!(model = %kind, "PR-AUC unavailable, no class has positives in the test split");
        }

        Ok(TrainedCandidate {
            learner,
            metrics,
            thresholds,
            trained_at,
            training_seconds,
        })
    }
}

/// Test-split metrics and validation-calibrated thresholds of a fitted learner
fn assess(
    learner: &TrainedLearner,
    data: &PreparedData,
    test_rows: &[usize],
    x_val: &Array2<f32>,
    y_val: &[usize],
) -> Result<(EvaluationMetrics, BTreeMap<usize, f64>)> {
    let x_test = take_rows(&data.x, test_rows)?;
    let y_test = take_labels(&data.y, test_rows);
    let test_proba = learner.as_learner().predict_proba(x_test.view())?;
    let metrics = evaluate(&y_test, &test_proba, data.classes());

    let val_proba = learner.as_learner().predict_proba(x_val.view())?;
    Ok((metrics, optimize_thresholds(y_val, &val_proba)))
}

/// Null metrics and the default threshold for every class
fn unassessed(n_classes: usize) -> (EvaluationMetrics, BTreeMap<usize, f64>) {
    let thresholds = (0..n_classes)
        .map(|class| (class, thresholds::DEFAULT_THRESHOLD))
        .collect();
    (EvaluationMetrics::unavailable(), thresholds)
}

/// Index of the best candidate: highest macro PR-AUC, then macro F1, then
/// earliest training time. Missing metrics rank lowest.
pub fn select_best(candidates: &[TrainedCandidate]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let better = match best {
            None => true,
            Some(b) => ranks_above(candidate, &candidates[b]),
        };
        if better {
            best = Some(i);
        }
    }

    if let Some(i) = best {
        info!(
            best_model = %candidates[i].kind(),
            macro_pr_auc = ?candidates[i].metrics.macro_pr_auc,
            candidates = candidates.len(),
            "Selected best model"
        );
    }
    best
}

fn ranks_above(a: &TrainedCandidate, b: &TrainedCandidate) -> bool {
    let score = |metric: Option<f64>| metric.unwrap_or(f64::NEG_INFINITY);
    let ordering = score(a.metrics.macro_pr_auc)
        .total_cmp(&score(b.metrics.macro_pr_auc))
        .then_with(|| score(a.metrics.macro_f1).total_cmp(&score(b.metrics.macro_f1)));

    match ordering {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => a.trained_at < b.trained_at,
    }
}

/// Copy the given rows into a new matrix, reporting allocation failure
fn take_rows(x: &Array2<f32>, rows: &[usize]) -> Result<Array2<f32>> {
    let n_cols = x.ncols();
    let mut data: Vec<f32> = Vec::new();
    data.try_reserve_exact(rows.len() * n_cols)
        .map_err(|e| PipelineError::OutOfMemory {
            stage: "training",
            detail: format!("{} x {} split: {}", rows.len(), n_cols, e),
        })?;
    for &row in rows {
        data.extend(x.row(row).iter().copied());
    }

    Array2::from_shape_vec((rows.len(), n_cols), data)
        .map_err(|e| PipelineError::Training(format!("split shape: {e}")))
}

fn take_labels(y: &[usize], rows: &[usize]) -> Vec<usize> {
    rows.iter().map(|&r| y[r]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Column;
    use chrono::Duration;

    fn frame(n_rows: usize) -> FeatureFrame {
        let labels = ["battery", "none", "thermal"];
        let mut frame = FeatureFrame::new(
            (0..n_rows).map(|i| format!("rec_{i}")).collect(),
            (0..n_rows).map(|i| labels[i % 3].to_string()).collect(),
        );
        frame.push(Column::float("signal", (0..n_rows).map(|i| (i % 3) as f64 * 10.0)));
        frame.push(Column::float("noise", (0..n_rows).map(|i| (i % 7) as f64)));
        frame
    }

    fn config() -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.boosting.n_estimators = 10;
        config.softmax.epochs = 50;
        config
    }

    fn columns() -> Vec<String> {
        vec!["signal".to_string(), "noise".to_string()]
    }

    #[test]
    fn test_prepare_data_encodes_targets() {
        let trainer = ModelTrainer::new(config());
        let data = trainer.prepare_data(frame(30), &columns()).unwrap();

        assert_eq!(data.classes(), &["battery", "none", "thermal"]);
        assert_eq!(data.y[..3], [0, 1, 2]);
        assert_eq!(data.x.dim(), (30, 2));
        assert_eq!(data.scaler.n_features(), 2);
    }

    #[test]
    fn test_partial_scaler_fit() {
        let mut config = config();
        config.partial_scaler_threshold = 10;
        config.scaler_fit_rows = 3;
        let trainer = ModelTrainer::new(config);
        let data = trainer.prepare_data(frame(30), &columns()).unwrap();

        // the first three rows carry signal 0, 10, 20
        assert_eq!(data.scaler.center()[0], 10.0);
    }

    #[test]
    fn test_missing_feature_column() {
        let trainer = ModelTrainer::new(config());
        let err = trainer
            .prepare_data(frame(9), &["absent".to_string()])
            .unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_single_class_rejected() {
        let mut single = FeatureFrame::new(
            vec!["a".to_string(), "b".to_string()],
            vec!["none".to_string(), "none".to_string()],
        );
        single.push(Column::float("signal", [1.0, 2.0]));
        let trainer = ModelTrainer::new(config());
        assert!(trainer.prepare_data(single, &["signal".to_string()]).is_err());
    }

    #[test]
    fn test_split_covers_all_rows() {
        let trainer = ModelTrainer::new(config());
        let y: Vec<usize> = (0..100).map(|i| i % 3).collect();
        let splits = trainer.split(&y);

        let mut all: Vec<usize> = splits
            .train
            .iter()
            .chain(&splits.validation)
            .chain(&splits.test)
            .copied()
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_train_candidates_and_select() {
        let trainer = ModelTrainer::new(config());
        let data = trainer.prepare_data(frame(90), &columns()).unwrap();
        let splits = trainer.split(&data.y);

        let candidates: Vec<TrainedCandidate> = [LearnerType::GradientBoosting, LearnerType::SoftmaxRegression]
            .into_iter()
            .map(|kind| trainer.train_candidate(kind, &data, &splits).unwrap())
            .collect();

        for candidate in &candidates {
            assert_eq!(candidate.thresholds.len(), 3);
            assert!(candidate.metrics.accuracy.is_some());
        }
        assert!(select_best(&candidates).is_some());
    }

    #[test]
    fn test_selection_tie_breaks() {
        let trainer = ModelTrainer::new(config());
        let data = trainer.prepare_data(frame(60), &columns()).unwrap();
        let splits = trainer.split(&data.y);
        let base = trainer
            .train_candidate(LearnerType::SoftmaxRegression, &data, &splits)
            .unwrap();

        let mut later = base.clone();
        later.trained_at = base.trained_at + Duration::seconds(5);
        let mut better_f1 = later.clone();
        better_f1.metrics.macro_f1 = base.metrics.macro_f1.map(|f| f + 0.1).or(Some(1.0));
        let mut no_auc = base.clone();
        no_auc.metrics.macro_pr_auc = None;

        assert_eq!(select_best(&[later.clone(), base.clone()]), Some(1));
        assert_eq!(select_best(&[base.clone(), better_f1]), Some(1));
        assert_eq!(select_best(&[no_auc, later]), Some(1));
        assert_eq!(select_best(&[]), None);
    }

    #[test]
    fn test_failed_evaluation_keeps_learner() {
        let trainer = ModelTrainer::new(config());
        let data = trainer.prepare_data(frame(60), &columns()).unwrap();
        let splits = trainer.split(&data.y);
        let base = trainer
            .train_candidate(LearnerType::SoftmaxRegression, &data, &splits)
            .unwrap();

        // scoring a narrower matrix than the learner was fitted on fails
        let mut narrow = data.clone();
        narrow.x = data.x.slice(s![.., ..1]).to_owned();
        let x_val = take_rows(&narrow.x, &splits.validation).unwrap();
        let y_val = take_labels(&narrow.y, &splits.validation);
        assert!(assess(&base.learner, &narrow, &splits.test, &x_val, &y_val).is_err());

        let (metrics, thresholds) = unassessed(data.target_encoder.len());
        assert_eq!(metrics, EvaluationMetrics::unavailable());
        assert_eq!(thresholds.len(), 3);
        assert!(thresholds.values().all(|&t| t == thresholds::DEFAULT_THRESHOLD));

        let mut unevaluated = base.clone();
        unevaluated.metrics = metrics;
        unevaluated.thresholds = thresholds;
        if base.metrics.macro_pr_auc.is_some() {
            assert_eq!(select_best(&[unevaluated, base]), Some(1));
        }
    }
}
