//! Histogram regression trees used by the boosting learner.
//!
//! Trees are stored as a flat node vector; node 0 is the root and a row
//! goes left when `value <= threshold`.

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Upper bound on histogram bins per feature (bin ids fit in a `u8`)
pub const MAX_BINS: usize = 256;

/// Tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f32,
        gain: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// A fitted regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Single-leaf tree
    pub fn leaf(value: f64) -> Self {
        Self {
            nodes: vec![Node::Leaf { value }],
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn predict_row(&self, row: ArrayView1<f32>) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Add each split's gain to its feature's slot
    pub fn accumulate_gain(&self, importances: &mut [f64]) {
        for node in &self.nodes {
            if let Node::Split { feature, gain, .. } = node {
                importances[*feature] += gain;
            }
        }
    }
}

/// Per-feature quantile bin edges
#[derive(Debug, Clone)]
pub struct FeatureBins {
    edges: Vec<Vec<f32>>,
}

impl FeatureBins {
    /// Compute at most `max_bins` bins per feature from the column
    /// quantiles of `x`.
    pub fn fit(x: ArrayView2<f32>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, MAX_BINS);
        let edges = x
            .columns()
            .into_iter()
            .map(|column| {
                let mut sorted: Vec<f32> = column.iter().copied().collect();
                sorted.sort_by(|a, b| a.total_cmp(b));

                let mut unique = sorted.clone();
                unique.dedup();

                if unique.len() <= max_bins {
                    // every distinct value but the largest is a cut point
                    unique.pop();
                    unique
                } else {
                    let n = sorted.len();
                    let max = sorted[n - 1];
                    let mut cuts: Vec<f32> = (1..max_bins)
                        .map(|k| sorted[k * n / max_bins])
                        .filter(|&v| v < max)
                        .collect();
                    cuts.dedup();
                    cuts
                }
            })
            .collect();

        Self { edges }
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.edges[feature].len() + 1
    }

    pub fn threshold(&self, feature: usize, bin: usize) -> f32 {
        self.edges[feature][bin]
    }

    /// Bin every cell of `x`, column-major
    pub fn bin_matrix(&self, x: ArrayView2<f32>) -> Vec<Vec<u8>> {
        x.columns()
            .into_iter()
            .zip(&self.edges)
            .map(|(column, edges)| {
                column
                    .iter()
                    .map(|&v| edges.partition_point(|&e| e < v) as u8)
                    .collect()
            })
            .collect()
    }
}

/// Growth parameters for a single tree
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_child_weight: f64,
    pub lambda: f64,
    /// Multiplier applied to every leaf value
    pub shrinkage: f64,
}

struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

/// Depth-first histogram tree grower over pre-binned columns
pub struct TreeBuilder<'a> {
    bins: &'a FeatureBins,
    binned: &'a [Vec<u8>],
    grad: &'a [f64],
    hess: &'a [f64],
    params: TreeParams,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(
        bins: &'a FeatureBins,
        binned: &'a [Vec<u8>],
        grad: &'a [f64],
        hess: &'a [f64],
        params: TreeParams,
    ) -> Self {
        Self {
            bins,
            binned,
            grad,
            hess,
            params,
            nodes: Vec::new(),
        }
    }

    /// Grow a tree over the given rows
    pub fn build(mut self, rows: Vec<usize>) -> RegressionTree {
        if rows.is_empty() {
            return RegressionTree::leaf(0.0);
        }
        self.grow(rows, 0);
        RegressionTree { nodes: self.nodes }
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let (g_sum, h_sum) = rows.iter().fold((0.0, 0.0), |(g, h), &r| {
            (g + self.grad[r], h + self.hess[r])
        });
        let leaf_value = -g_sum / (h_sum + self.params.lambda) * self.params.shrinkage;

        let index = self.nodes.len();
        self.nodes.push(Node::Leaf { value: leaf_value });

        if depth >= self.params.max_depth || rows.len() < 2 {
            return index;
        }

        let Some(split) = self.best_split(&rows, g_sum, h_sum) else {
            return index;
        };

        let column = &self.binned[split.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| (column[r] as usize) <= split.bin);

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);

        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: self.bins.threshold(split.feature, split.bin),
            gain: split.gain,
            left,
            right,
        };
        index
    }

    fn best_split(&self, rows: &[usize], g_sum: f64, h_sum: f64) -> Option<SplitCandidate> {
        let lambda = self.params.lambda;
        let parent_score = g_sum * g_sum / (h_sum + lambda);
        let mut best: Option<SplitCandidate> = None;

        for (feature, column) in self.binned.iter().enumerate() {
            let n_bins = self.bins.n_bins(feature);
            if n_bins < 2 {
                continue;
            }

            let mut hist_g = vec![0.0; n_bins];
            let mut hist_h = vec![0.0; n_bins];
            for &r in rows {
                let bin = column[r] as usize;
                hist_g[bin] += self.grad[r];
                hist_h[bin] += self.hess[r];
            }

            let (mut g_left, mut h_left) = (0.0, 0.0);
            for bin in 0..n_bins - 1 {
                g_left += hist_g[bin];
                h_left += hist_h[bin];
                let g_right = g_sum - g_left;
                let h_right = h_sum - h_left;
                if h_left < self.params.min_child_weight || h_right < self.params.min_child_weight
                {
                    continue;
                }

                let gain = 0.5
                    * (g_left * g_left / (h_left + lambda) + g_right * g_right / (h_right + lambda)
                        - parent_score);
                if gain > 1e-10 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate { feature, bin, gain });
                }
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 3,
            min_child_weight: 0.0,
            lambda: 0.0,
            shrinkage: 1.0,
        }
    }

    #[test]
    fn test_bins_respect_thresholds() {
        let x = array![[1.0_f32], [2.0], [3.0], [4.0]];
        let bins = FeatureBins::fit(x.view(), 16);
        assert_eq!(bins.n_bins(0), 4);

        let binned = bins.bin_matrix(x.view());
        assert_eq!(binned[0], vec![0, 1, 2, 3]);
        // bin b holds values <= threshold(b)
        assert_eq!(bins.threshold(0, 1), 2.0);
    }

    #[test]
    fn test_constant_feature_has_one_bin() {
        let x = array![[5.0_f32], [5.0], [5.0]];
        let bins = FeatureBins::fit(x.view(), 16);
        assert_eq!(bins.n_bins(0), 1);
    }

    #[test]
    fn test_tree_separates_step_function() {
        let x = array![[1.0_f32], [2.0], [3.0], [4.0]];
        let bins = FeatureBins::fit(x.view(), 16);
        let binned = bins.bin_matrix(x.view());
        // squared loss towards targets -1, -1, 1, 1
        let grad = vec![1.0, 1.0, -1.0, -1.0];
        let hess = vec![1.0; 4];

        let tree = TreeBuilder::new(&bins, &binned, &grad, &hess, params()).build(vec![0, 1, 2, 3]);

        assert!((tree.predict_row(x.row(0)) + 1.0).abs() < 1e-12);
        assert!((tree.predict_row(x.row(3)) - 1.0).abs() < 1e-12);

        let mut importances = vec![0.0];
        tree.accumulate_gain(&mut importances);
        assert!(importances[0] > 0.0);
    }

    #[test]
    fn test_depth_zero_is_single_leaf() {
        let x = array![[1.0_f32], [2.0]];
        let bins = FeatureBins::fit(x.view(), 16);
        let binned = bins.bin_matrix(x.view());
        let grad = vec![1.0, -1.0];
        let hess = vec![1.0, 1.0];
        let mut p = params();
        p.max_depth = 0;

        let tree = TreeBuilder::new(&bins, &binned, &grad, &hess, p).build(vec![0, 1]);
        assert_eq!(tree.nodes().len(), 1);
    }
}
