//! Median / inter-quartile-range feature scaling

use crate::error::{PipelineError, Result};
use crate::features::aggregates::quantile;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Per-feature robust scaler: `(x - median) / IQR`, IQR of zero treated as 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustScaler {
    center: Vec<f64>,
    scale: Vec<f64>,
}

impl RobustScaler {
    pub fn fit(x: ArrayView2<f32>) -> Self {
        let (center, scale) = x
            .columns()
            .into_iter()
            .map(|column| {
                let mut values: Vec<f64> = column.iter().map(|&v| f64::from(v)).collect();
                let median = quantile(&mut values, 0.5).unwrap_or(0.0);
                let q1 = quantile(&mut values, 0.25).unwrap_or(0.0);
                let q3 = quantile(&mut values, 0.75).unwrap_or(0.0);
                let iqr = q3 - q1;
                (median, if iqr > 0.0 { iqr } else { 1.0 })
            })
            .unzip();

        Self { center, scale }
    }

    pub fn n_features(&self) -> usize {
        self.center.len()
    }

    pub fn center(&self) -> &[f64] {
        &self.center
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// Scale `x` in place
    pub fn transform(&self, x: &mut Array2<f32>) -> Result<()> {
        if x.ncols() != self.n_features() {
            return Err(PipelineError::InvalidArtifact(format!(
                "scaler fitted on {} features, got {}",
                self.n_features(),
                x.ncols()
            )));
        }

        for mut row in x.rows_mut() {
            for ((value, center), scale) in row.iter_mut().zip(&self.center).zip(&self.scale) {
                *value = ((f64::from(*value) - center) / scale) as f32;
            }
        }
        Ok(())
    }
}
