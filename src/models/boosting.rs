//! Gradient-boosted trees with a softmax objective

use super::tree::{FeatureBins, RegressionTree, TreeBuilder, TreeParams};
use super::{check_width, log_loss, softmax_in_place, EvalSet, Learner, LearnerType};
use crate::error::{PipelineError, Result};
use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Boosting hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    /// Maximum boosting rounds
    pub n_estimators: usize,
    /// Shrinkage applied to every tree
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Minimum hessian sum per child
    pub min_child_weight: f64,
    /// L2 penalty on leaf values
    pub lambda: f64,
    /// Fraction of rows drawn per round
    pub subsample: f64,
    /// Histogram bins per feature
    pub max_bins: usize,
    /// Rounds without validation improvement before stopping
    pub early_stopping_rounds: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 6,
            min_child_weight: 1.0,
            lambda: 1.0,
            subsample: 0.8,
            max_bins: 64,
            early_stopping_rounds: 20,
        }
    }
}

/// Multi-class gradient boosting: one tree per class per round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    params: BoostingParams,
    seed: u64,
    n_features: usize,
    n_classes: usize,
    /// Initial logit per class (log prior)
    base_score: Vec<f64>,
    /// `rounds[r][k]` is the tree for class `k` in round `r`
    rounds: Vec<Vec<RegressionTree>>,
    best_iteration: Option<usize>,
}

impl GradientBoosting {
    pub fn new(params: BoostingParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            n_features: 0,
            n_classes: 0,
            base_score: Vec::new(),
            rounds: Vec::new(),
            best_iteration: None,
        }
    }

    /// Rounds kept after early stopping
    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }

    pub fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.params.max_depth,
            min_child_weight: self.params.min_child_weight,
            lambda: self.params.lambda,
            shrinkage: self.params.learning_rate,
        }
    }

    fn init_scores(&self, n_rows: usize) -> Array2<f64> {
        let mut scores = Array2::zeros((n_rows, self.n_classes));
        for mut row in scores.rows_mut() {
            for (cell, base) in row.iter_mut().zip(&self.base_score) {
                *cell = *base;
            }
        }
        scores
    }

    fn add_round(scores: &mut Array2<f64>, x: &ArrayView2<f32>, trees: &[RegressionTree]) {
        for (i, row) in x.rows().into_iter().enumerate() {
            for (k, tree) in trees.iter().enumerate() {
                scores[[i, k]] += tree.predict_row(row);
            }
        }
    }

    fn scores_to_proba(mut scores: Array2<f64>) -> Array2<f64> {
        for mut row in scores.rows_mut() {
            if let Some(slice) = row.as_slice_mut() {
                softmax_in_place(slice);
            }
        }
        scores
    }
}

impl Learner for GradientBoosting {
    fn kind(&self) -> LearnerType {
        LearnerType::GradientBoosting
    }

    fn fit(
        &mut self,
        x: ArrayView2<f32>,
        y: &[usize],
        n_classes: usize,
        eval_set: Option<EvalSet<'_>>,
    ) -> Result<()> {
        if x.nrows() != y.len() || y.is_empty() {
            return Err(PipelineError::Training(format!(
                "boosting needs matching non-empty rows and labels, got {} rows and {} labels",
                x.nrows(),
                y.len()
            )));
        }

        if let Some(&bad) = y.iter().find(|&&c| c >= n_classes) {
            return Err(PipelineError::Training(format!(
                "label index {bad} out of range for {n_classes} classes"
            )));
        }

        let n_rows = x.nrows();
        self.n_features = x.ncols();
        self.n_classes = n_classes;
        self.rounds.clear();
        self.best_iteration = None;

        let mut counts = vec![0usize; n_classes];
        for &class in y {
            counts[class] += 1;
        }
        self.base_score = counts
            .iter()
            .map(|&c| ((c as f64 + 1.0) / (n_rows as f64 + n_classes as f64)).ln())
            .collect();

        let bins = FeatureBins::fit(x, self.params.max_bins);
        let binned = bins.bin_matrix(x);
        let params = self.tree_params();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut train_scores = self.init_scores(n_rows);
        let mut eval_scores = eval_set.map(|(ex, _)| self.init_scores(ex.nrows()));
        let mut best_loss = f64::INFINITY;
        let mut best_round = 0;

        let mut grad = vec![0.0; n_rows];
        let mut hess = vec![0.0; n_rows];

        for round in 0..self.params.n_estimators {
            let proba = Self::scores_to_proba(train_scores.clone());

            let mut rows: Vec<usize> = (0..n_rows)
                .filter(|_| rng.gen::<f64>() < self.params.subsample)
                .collect();
            if rows.is_empty() {
                rows = (0..n_rows).collect();
            }

            let mut trees = Vec::with_capacity(n_classes);
            for k in 0..n_classes {
                for i in 0..n_rows {
                    let p = proba[[i, k]];
                    let target = if y[i] == k { 1.0 } else { 0.0 };
                    grad[i] = p - target;
                    hess[i] = (p * (1.0 - p)).max(1e-6);
                }
                trees.push(TreeBuilder::new(&bins, &binned, &grad, &hess, params).build(rows.clone()));
            }

            Self::add_round(&mut train_scores, &x, &trees);
            self.rounds.push(trees);

            if let (Some((ex, ey)), Some(scores)) = (eval_set, eval_scores.as_mut()) {
                if let Some(trees) = self.rounds.last() {
                    Self::add_round(scores, &ex, trees);
                }
                let loss = log_loss(&Self::scores_to_proba(scores.clone()), ey);
                debug!(round = round, eval_mlogloss = loss, "Boosting round");

                if loss < best_loss {
                    best_loss = loss;
                    best_round = round;
                } else if round - best_round >= self.params.early_stopping_rounds {
                    info!(
                        best_round = best_round,
                        eval_mlogloss = best_loss,
                        "Early stopping"
                    );
                    break;
                }
            }
        }

        if eval_set.is_some() && !self.rounds.is_empty() {
            self.rounds.truncate(best_round + 1);
            self.best_iteration = Some(best_round);
        }

        info!(
            rounds = self.rounds.len(),
            features = self.n_features,
            classes = self.n_classes,
            "Gradient boosting fitted"
        );

        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f32>) -> Result<Array2<f64>> {
        if !self.is_fitted() {
            return Err(PipelineError::Training("model is not fitted".to_string()));
        }
        check_width(self.n_features, &x)?;

        let mut scores = self.init_scores(x.nrows());
        for trees in &self.rounds {
            Self::add_round(&mut scores, &x, trees);
        }
        Ok(Self::scores_to_proba(scores))
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        if !self.is_fitted() {
            return None;
        }
        let mut importances = vec![0.0; self.n_features];
        for tree in self.rounds.iter().flatten() {
            tree.accumulate_gain(&mut importances);
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        Some(importances)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Three well separated classes along the first feature
    fn toy_data() -> (Array2<f32>, Vec<usize>) {
        let mut values = Vec::new();
        let mut labels = Vec::new();
        for i in 0..90 {
            let class = i % 3;
            values.push(class as f32 * 10.0 + (i as f32 % 7.0) * 0.1);
            values.push((i % 5) as f32);
            labels.push(class);
        }
        (Array2::from_shape_vec((90, 2), values).unwrap(), labels)
    }

    fn small_params() -> BoostingParams {
        BoostingParams {
            n_estimators: 20,
            subsample: 1.0,
            max_depth: 3,
            ..BoostingParams::default()
        }
    }

    #[test]
    fn test_boosting_learns_separable_classes() {
        let (x, y) = toy_data();
        let mut model = GradientBoosting::new(small_params(), 42);
        model.fit(x.view(), &y, 3, None).unwrap();

        let predicted = model.predict(x.view()).unwrap();
        assert_eq!(predicted, y);

        let proba = model.predict_proba(x.view()).unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_importances_favor_informative_feature() {
        let (x, y) = toy_data();
        let mut model = GradientBoosting::new(small_params(), 42);
        model.fit(x.view(), &y, 3, None).unwrap();

        let importances = model.feature_importances().unwrap();
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
    }

    #[test]
    fn test_early_stopping_truncates_rounds() {
        let (x, y) = toy_data();
        let params = BoostingParams {
            n_estimators: 200,
            early_stopping_rounds: 3,
            ..small_params()
        };
        let mut model = GradientBoosting::new(params, 42);
        model.fit(x.view(), &y, 3, Some((x.view(), &y))).unwrap();

        let best = model.best_iteration().unwrap();
        assert_eq!(model.n_rounds(), best + 1);
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let (x, y) = toy_data();
        let mut model = GradientBoosting::new(small_params(), 42);
        model.fit(x.view(), &y, 3, None).unwrap();

        let narrow = Array2::<f32>::zeros((1, 1));
        assert!(model.predict_proba(narrow.view()).is_err());
    }

    #[test]
    fn test_serialized_model_predicts_identically() {
        let (x, y) = toy_data();
        let mut model = GradientBoosting::new(small_params(), 42);
        model.fit(x.view(), &y, 3, None).unwrap();

        let json = serde_json::to_string(&model).unwrap();
        let restored: GradientBoosting = serde_json::from_str(&json).unwrap();
        let before = model.predict_proba(x.view()).unwrap();
        let after = restored.predict_proba(x.view()).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
