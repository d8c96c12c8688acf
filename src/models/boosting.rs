//! Gradient boosting regression (least squares)
//!
//! Starts from the target mean and adds shallow trees fitted to the current
//! residuals, each shrunk by the learning rate.

use super::{check_width, ModelError, Regressor};
use super::tree::{RegressionTree, TreeParams};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    pub params: GradientBoostingParams,
    init: f64,
    stages: Vec<RegressionTree>,
    n_features: Option<usize>,
}

impl GradientBoostingRegressor {
    pub fn new(params: GradientBoostingParams) -> Self {
        Self {
            params,
            init: 0.0,
            stages: Vec::new(),
            n_features: None,
        }
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }
}

impl Regressor for GradientBoostingRegressor {
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

        let init = y.iter().sum::<f64>() / n as f64;
        let mut current = vec![init; n];
        let indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let tree_params = TreeParams {
            max_depth: Some(self.params.max_depth),
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: None,
        };

        let mut stages = Vec::with_capacity(self.params.n_estimators);
        for _ in 0..self.params.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&current).map(|(t, p)| t - p).collect();

            let mut tree = RegressionTree::new(tree_params);
            tree.fit_indices(x, &residuals, &indices, &mut rng)?;

            for (i, row) in x.rows().into_iter().enumerate() {
                let step = tree.predict_row(&row.to_vec())?;
                current[i] += self.params.learning_rate * step;
            }
            stages.push(tree);
        }

        self.init = init;
        self.stages = stages;
        self.n_features = Some(x.ncols());
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> Result<f64, ModelError> {
        let n_features = self.n_features.ok_or(ModelError::NotFitted)?;
        check_width(n_features, row)?;

        let mut value = self.init;
        for stage in &self.stages {
            value += self.params.learning_rate * stage.predict_row(row)?;
        }
        Ok(value)
    }

    fn n_features(&self) -> Option<usize> {
        self.n_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{mean_squared_error, to_matrix};

    #[test]
    fn test_boosting_reduces_training_error() {
        let rows: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..30).map(|i| ((i as f64) / 5.0).sin() * 2.0 + 3.0).collect();
        let x = to_matrix(&rows).unwrap();

        let mut few = GradientBoostingRegressor::new(GradientBoostingParams {
            n_estimators: 2,
            ..Default::default()
        });
        let mut many = GradientBoostingRegressor::new(GradientBoostingParams {
            n_estimators: 50,
            ..Default::default()
        });
        few.fit(&x, &y).unwrap();
        many.fit(&x, &y).unwrap();

        let mse_few = mean_squared_error(&y, &few.predict_matrix(&x).unwrap());
        let mse_many = mean_squared_error(&y, &many.predict_matrix(&x).unwrap());
        assert!(mse_many < mse_few);
        assert_eq!(many.n_stages(), 50);
    }

    #[test]
    fn test_zero_stages_predicts_mean() {
        let x = to_matrix(&[vec![0.0], vec![1.0]]).unwrap();
        let mut model = GradientBoostingRegressor::new(GradientBoostingParams {
            n_estimators: 0,
            ..Default::default()
        });
        model.fit(&x, &[2.0, 4.0]).unwrap();
        assert_eq!(model.predict_row(&[10.0]).unwrap(), 3.0);
    }

    #[test]
    fn test_unfitted_boosting_errors() {
        let model = GradientBoostingRegressor::new(GradientBoostingParams::default());
        assert_eq!(model.predict_row(&[1.0]), Err(ModelError::NotFitted));
    }
}
