//! CART regression tree
//!
//! Greedy binary splits minimizing the summed squared error of the two
//! children. Nodes live in a flat arena so the fitted tree serializes as a
//! plain list.

use super::{check_width, ModelError, Regressor};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Growth limits for a single tree
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Maximum depth (None = grow until leaves are pure or too small)
    pub max_depth: Option<usize>,
    /// Minimum rows in a node before a split is attempted
    pub min_samples_split: usize,
    /// Minimum rows each child must keep
    pub min_samples_leaf: usize,
    /// Features considered per split (None = all)
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    cost: f64,
}

/// A fitted (or empty) regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub params: TreeParams,
    nodes: Vec<Node>,
    n_features: Option<usize>,
}

impl RegressionTree {
    pub fn new(params: TreeParams) -> Self {
        Self {
            params,
            nodes: Vec::new(),
            n_features: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Number of nodes (leaves + splits)
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Fit on a subset of rows; `indices` may contain repeats (bootstrap samples)
    pub fn fit_indices(
        &mut self,
        x: &Array2<f64>,
        y: &[f64],
        indices: &[usize],
        rng: &mut StdRng,
    ) -> Result<(), ModelError> {
        if indices.is_empty() || x.nrows() == 0 {
            return Err(ModelError::EmptyInput);
        }
        if x.nrows() != y.len() {
            return Err(ModelError::DimensionMismatch {
                expected: x.nrows(),
                got: y.len(),
            });
        }

        self.nodes.clear();
        self.n_features = Some(x.ncols());
        self.build(x, y, indices.to_vec(), 0, rng);
        Ok(())
    }

    fn build(
        &mut self,
        x: &Array2<f64>,
        y: &[f64],
        indices: Vec<usize>,
        depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let n = indices.len();
        let sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let value = sum / n as f64;

        let node_id = self.nodes.len();
        self.nodes.push(Node::Leaf { value });

        let depth_ok = self.params.max_depth.map_or(true, |d| depth < d);
        let min_leaf = self.params.min_samples_leaf.max(1);
        if !depth_ok || n < self.params.min_samples_split.max(2) || n < 2 * min_leaf {
            return node_id;
        }

        let Some(split) = self.best_split(x, y, &indices, rng) else {
            return node_id;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, split.feature]] <= split.threshold);

        if left_idx.is_empty() || right_idx.is_empty() {
            return node_id;
        }

        let left = self.build(x, y, left_idx, depth + 1, rng);
        let right = self.build(x, y, right_idx, depth + 1, rng);
        self.nodes[node_id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_id
    }

    fn candidate_features(&self, n_features: usize, rng: &mut StdRng) -> Vec<usize> {
        match self.params.max_features {
            Some(m) if m > 0 && m < n_features => {
                let mut picked = rand::seq::index::sample(rng, n_features, m).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..n_features).collect(),
        }
    }

    fn best_split(
        &self,
        x: &Array2<f64>,
        y: &[f64],
        indices: &[usize],
        rng: &mut StdRng,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf.max(1);

        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
        let parent_cost = total_sq - total_sum * total_sum / n as f64;
        if parent_cost <= 1e-12 {
            return None;
        }

        let mut best: Option<SplitCandidate> = None;
        let mut column: Vec<(f64, f64)> = Vec::with_capacity(n);

        for feature in self.candidate_features(x.ncols(), rng) {
            column.clear();
            column.extend(indices.iter().map(|&i| (x[[i, feature]], y[i])));
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 0..n - 1 {
                let (v, target) = column[k];
                left_sum += target;
                left_sq += target * target;

                let next = column[k + 1].0;
                if v == next {
                    continue;
                }
                let left_n = k + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }

                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let cost = (left_sq - left_sum * left_sum / left_n as f64)
                    + (right_sq - right_sum * right_sum / right_n as f64);

                if best.map_or(true, |b| cost < b.cost - 1e-12) {
                    let mut threshold = (v + next) / 2.0;
                    if threshold >= next {
                        threshold = v;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        cost,
                    });
                }
            }
        }

        best.filter(|b| b.cost < parent_cost - 1e-12)
    }
}

impl Regressor for RegressionTree {
    fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<(), ModelError> {
        let indices: Vec<usize> = (0..x.nrows()).collect();
        let mut rng = StdRng::seed_from_u64(0);
        self.fit_indices(x, y, &indices, &mut rng)
    }

    fn predict_row(&self, row: &[f64]) -> Result<f64, ModelError> {
        let n_features = self.n_features.ok_or(ModelError::NotFitted)?;
        check_width(n_features, row)?;

        let mut idx = 0;
        loop {
            match self.nodes.get(idx).ok_or(ModelError::NotFitted)? {
                Node::Leaf { value } => return Ok(*value),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    fn n_features(&self) -> Option<usize> {
        self.n_features
    }
}
