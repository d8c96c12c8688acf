//! Estimators for the personalization engine
//!
//! Small, dependency-light implementations of the learners the engine needs:
//! - Random forest regression (bootstrap-aggregated CART trees)
//! - Gradient boosting regression (least-squares boosting over shallow trees)
//! - K-means clustering with k-means++ seeding and multiple restarts
//! - Standard scaling (zero mean, unit variance)
//! - Holdout metrics and a seeded train/test split
//!
//! Every estimator is deterministic for a given seed and serializes its
//! hyperparameters together with its learned parameters, so a persisted
//! model reproduces the same predictions after a reload.

pub mod boosting;
pub mod forest;
pub mod kmeans;
pub mod metrics;
pub mod scaler;
pub mod tree;

pub use boosting::{GradientBoostingParams, GradientBoostingRegressor};
pub use forest::{ForestParams, RandomForestRegressor};
pub use kmeans::{KMeans, KMeansParams};
pub use metrics::{mean_squared_error, r2_score, train_test_split};
pub use scaler::StandardScaler;
pub use tree::{RegressionTree, TreeParams};

use ndarray::Array2;
use thiserror::Error;

/// Errors raised by estimators during fitting or inference
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("model has not been fitted")]
    NotFitted,
    #[error("feature dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("insufficient data: need {needed} rows, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("empty input")]
    EmptyInput,
}

/// A fitted regressor that maps one feature row to a scalar
pub trait Regressor {
    /// Fit on a row-major feature matrix and its targets
    fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<(), ModelError>;

    /// Predict a single row
    fn predict_row(&self, row: &[f64]) -> Result<f64, ModelError>;

    /// Number of features seen during fitting (None if unfitted)
    fn n_features(&self) -> Option<usize>;

    /// Predict every row of a matrix
    fn predict_matrix(&self, x: &Array2<f64>) -> Result<Vec<f64>, ModelError> {
        x.rows()
            .into_iter()
            .map(|row| self.predict_row(&row.to_vec()))
            .collect()
    }
}

/// Build a dense matrix from feature rows, checking every row has the same width
pub fn to_matrix(rows: &[Vec<f64>]) -> Result<Array2<f64>, ModelError> {
    let first = rows.first().ok_or(ModelError::EmptyInput)?;
    let width = first.len();
    if width == 0 {
        return Err(ModelError::EmptyInput);
    }

    let mut flat = Vec::with_capacity(rows.len() * width);
    for row in rows {
        if row.len() != width {
            return Err(ModelError::DimensionMismatch {
                expected: width,
                got: row.len(),
            });
        }
        flat.extend_from_slice(row);
    }

    Array2::from_shape_vec((rows.len(), width), flat).map_err(|_| ModelError::EmptyInput)
}

/// Select a subset of rows (by index) into a new matrix
pub fn select_rows(x: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    x.select(ndarray::Axis(0), indices)
}

/// Guard that a row has the width the model was fitted on
pub(crate) fn check_width(expected: usize, row: &[f64]) -> Result<(), ModelError> {
    if row.len() != expected {
        return Err(ModelError::DimensionMismatch {
            expected,
            got: row.len(),
        });
    }
    Ok(())
}
