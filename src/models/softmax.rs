//! Multinomial logistic regression trained by full-batch gradient descent

use super::{check_width, log_loss, softmax_in_place, EvalSet, Learner, LearnerType};
use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Softmax regression hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftmaxParams {
    pub epochs: usize,
    pub learning_rate: f64,
    /// L2 penalty on weights (bias excluded)
    pub l2: f64,
    pub early_stopping_rounds: usize,
}

impl Default for SoftmaxParams {
    fn default() -> Self {
        Self {
            epochs: 300,
            learning_rate: 0.5,
            l2: 1e-4,
            early_stopping_rounds: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftmaxRegression {
    params: SoftmaxParams,
    n_features: usize,
    n_classes: usize,
    /// Row-major `n_features × n_classes`
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl SoftmaxRegression {
    pub fn new(params: SoftmaxParams) -> Self {
        Self {
            params,
            n_features: 0,
            n_classes: 0,
            weights: Vec::new(),
            bias: Vec::new(),
        }
    }

    fn proba(x: &ArrayView2<f32>, weights: &Array2<f32>, bias: &Array1<f32>) -> Array2<f64> {
        let logits = x.dot(weights) + bias;
        let mut proba = logits.mapv(f64::from);
        for mut row in proba.rows_mut() {
            if let Some(slice) = row.as_slice_mut() {
                softmax_in_place(slice);
            }
        }
        proba
    }
}

impl Learner for SoftmaxRegression {
    fn kind(&self) -> LearnerType {
        LearnerType::SoftmaxRegression
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
                "softmax regression needs matching non-empty rows and labels, got {} rows and {} labels",
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
        let n_features = x.ncols();
        let lr = self.params.learning_rate as f32;
        let l2 = self.params.l2 as f32;

        let mut one_hot = Array2::<f32>::zeros((n_rows, n_classes));
        for (i, &class) in y.iter().enumerate() {
            one_hot[[i, class]] = 1.0;
        }

        let mut weights = Array2::<f32>::zeros((n_features, n_classes));
        let mut bias = Array1::<f32>::zeros(n_classes);
        let mut best = (weights.clone(), bias.clone());
        let mut best_loss = f64::INFINITY;
        let mut best_epoch = 0;

        for epoch in 0..self.params.epochs {
            let proba = Self::proba(&x, &weights, &bias).mapv(|p| p as f32);
            let residual = proba - &one_hot;

            let grad_w = x.t().dot(&residual) / n_rows as f32 + &weights * l2;
            let grad_b = residual.sum_axis(ndarray::Axis(0)) / n_rows as f32;

            weights.scaled_add(-lr, &grad_w);
            bias.scaled_add(-lr, &grad_b);

            if let Some((ex, ey)) = eval_set {
                let loss = log_loss(&Self::proba(&ex, &weights, &bias), ey);
                if epoch % 25 == 0 {
                    debug!(epoch = epoch, eval_mlogloss = loss, "Softmax epoch");
                }

                if loss < best_loss {
                    best_loss = loss;
                    best_epoch = epoch;
                    best = (weights.clone(), bias.clone());
                } else if epoch - best_epoch >= self.params.early_stopping_rounds {
                    info!(
                        best_epoch = best_epoch,
                        eval_mlogloss = best_loss,
                        "Early stopping"
                    );
                    break;
                }
            }
        }

        let (weights, bias) = if eval_set.is_some() && best_loss.is_finite() {
            best
        } else {
            (weights, bias)
        };

        self.n_features = n_features;
        self.n_classes = n_classes;
        self.weights = weights.iter().copied().collect();
        self.bias = bias.to_vec();

        info!(
            features = n_features,
            classes = n_classes,
            "Softmax regression fitted"
        );

        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f32>) -> Result<Array2<f64>> {
        if !self.is_fitted() {
            return Err(PipelineError::Training("model is not fitted".to_string()));
        }
        check_width(self.n_features, &x)?;

        let weights = Array2::from_shape_vec((self.n_features, self.n_classes), self.weights.clone())
            .map_err(|e| PipelineError::InvalidArtifact(format!("softmax weights: {e}")))?;
        let bias = Array1::from_vec(self.bias.clone());
        Ok(Self::proba(&x, &weights, &bias))
    }

    /// Mean absolute weight per feature, normalised
    fn feature_importances(&self) -> Option<Vec<f64>> {
        if !self.is_fitted() || self.n_classes == 0 {
            return None;
        }
        let mut importances: Vec<f64> = self
            .weights
            .chunks(self.n_classes)
            .map(|row| row.iter().map(|w| f64::from(w.abs())).sum::<f64>() / self.n_classes as f64)
            .collect();
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

    fn toy_data() -> (Array2<f32>, Vec<usize>) {
        let mut values = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let class = i % 3;
            // one-hot-ish clusters
            for j in 0..3 {
                values.push(if j == class { 2.0 } else { -1.0 } + (i % 4) as f32 * 0.05);
            }
            labels.push(class);
        }
        (Array2::from_shape_vec((60, 3), values).unwrap(), labels)
    }

    #[test]
    fn test_softmax_regression_fits_clusters() {
        let (x, y) = toy_data();
        let mut model = SoftmaxRegression::new(SoftmaxParams {
            epochs: 200,
            ..SoftmaxParams::default()
        });
        model.fit(x.view(), &y, 3, None).unwrap();

        assert_eq!(model.predict(x.view()).unwrap(), y);
        let proba = model.predict_proba(x.view()).unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_unfitted_model_rejects_prediction() {
        let model = SoftmaxRegression::new(SoftmaxParams::default());
        let x = Array2::<f32>::zeros((1, 3));
        assert!(model.predict_proba(x.view()).is_err());
        assert!(model.feature_importances().is_none());
    }

    #[test]
    fn test_out_of_range_label_rejected() {
        let (x, mut y) = toy_data();
        y[0] = 7;
        let mut model = SoftmaxRegression::new(SoftmaxParams::default());
        assert!(model.fit(x.view(), &y, 3, None).is_err());
    }
}
