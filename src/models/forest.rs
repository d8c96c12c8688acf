//! Random forest regression
//!
//! Bagged CART trees: each tree sees a bootstrap sample of the rows and the
//! forest predicts the mean of its trees.

use super::{check_width, ModelError, Regressor};
use super::tree::{RegressionTree, TreeParams};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Forest hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub tree: TreeParams,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            tree: TreeParams::default(),
            bootstrap: true,
            seed: 42,
        }
    }
}

impl ForestParams {
    /// Convenience constructor for the common depth/split/leaf knobs
    pub fn new(
        n_estimators: usize,
        max_depth: usize,
        min_samples_split: usize,
        min_samples_leaf: usize,
        seed: u64,
    ) -> Self {
        Self {
            n_estimators,
            tree: TreeParams {
                max_depth: Some(max_depth),
                min_samples_split,
                min_samples_leaf,
                max_features: None,
            },
            bootstrap: true,
            seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub params: ForestParams,
    trees: Vec<RegressionTree>,
    n_features: Option<usize>,
}

impl RandomForestRegressor {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            n_features: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for RandomForestRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<(), ModelError> {
        let n = x.nrows();
        if n == 0 {
            return Err(ModelError::EmptyInput);
        }
        if n != y.len() {
            return Err(ModelError::DimensionMismatch {
                expected: n,
                got: y.len(),
            });
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut trees = Vec::with_capacity(self.params.n_estimators.max(1));

        for _ in 0..self.params.n_estimators.max(1) {
            let indices: Vec<usize> = if self.params.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };

            let mut tree = RegressionTree::new(self.params.tree);
            tree.fit_indices(x, y, &indices, &mut rng)?;
            trees.push(tree);
        }

        self.trees = trees;
        self.n_features = Some(x.ncols());
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> Result<f64, ModelError> {
        let n_features = self.n_features.ok_or(ModelError::NotFitted)?;
        check_width(n_features, row)?;
        if self.trees.is_empty() {
            return Err(ModelError::NotFitted);
        }

        let mut total = 0.0;
        for tree in &self.trees {
            total += tree.predict_row(row)?;
        }
        Ok(total / self.trees.len() as f64)
    }

    fn n_features(&self) -> Option<usize> {
        self.n_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::to_matrix;

    fn linear_data() -> (Array2<f64>, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let y: Vec<f64> = (0..40).map(|i| 1.0 + i as f64 / 10.0).collect();
        (to_matrix(&rows).unwrap(), y)
    }

    #[test]
    fn test_forest_tracks_trend() {
        let (x, y) = linear_data();
        let mut forest = RandomForestRegressor::new(ForestParams::new(20, 6, 2, 1, 42));
        forest.fit(&x, &y).unwrap();

        let low = forest.predict_row(&[2.0, 2.0]).unwrap();
        let high = forest.predict_row(&[37.0, 1.0]).unwrap();
        assert!(low < 2.0, "low = {}", low);
        assert!(high > 4.0, "high = {}", high);
        assert_eq!(forest.n_trees(), 20);
    }

    #[test]
    fn test_same_seed_same_model() {
        let (x, y) = linear_data();
        let mut a = RandomForestRegressor::new(ForestParams::new(10, 4, 2, 1, 7));
        let mut b = RandomForestRegressor::new(ForestParams::new(10, 4, 2, 1, 7));
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_predictions_within_target_range() {
        let (x, y) = linear_data();
        let mut forest = RandomForestRegressor::new(ForestParams::new(15, 5, 2, 1, 3));
        forest.fit(&x, &y).unwrap();
        for row in [[-100.0, 0.0], [1000.0, 5.0]] {
            let p = forest.predict_row(&row).unwrap();
            assert!((1.0..=4.9).contains(&p));
        }
    }

    #[test]
    fn test_serde_preserves_predictions() {
        let (x, y) = linear_data();
        let mut forest = RandomForestRegressor::new(ForestParams::new(5, 4, 2, 1, 1));
        forest.fit(&x, &y).unwrap();

        let json = serde_json::to_string(&forest).unwrap();
        let restored: RandomForestRegressor = serde_json::from_str(&json).unwrap();
        assert_eq!(
            forest.predict_row(&[12.0, 0.0]).unwrap(),
            restored.predict_row(&[12.0, 0.0]).unwrap()
        );
    }

    #[test]
    fn test_unfitted_forest_errors() {
        let forest = RandomForestRegressor::new(ForestParams::default());
        assert_eq!(forest.predict_row(&[0.0]), Err(ModelError::NotFitted));
    }
}
