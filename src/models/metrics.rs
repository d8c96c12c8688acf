//! Holdout metrics and a seeded train/test split

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use statrs::statistics::Statistics;

/// Mean squared error between targets and predictions (0.0 for empty input)
pub fn mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let n = y_true.len().min(y_pred.len());
    if n == 0 {
        return 0.0;
    }
    y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / n as f64
}

/// Coefficient of determination
///
/// Constant targets give 1.0 for a perfect fit and 0.0 otherwise.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let n = y_true.len().min(y_pred.len());
    if n == 0 {
        return 0.0;
    }
    let mean = Statistics::mean(&y_true[..n]);
    let ss_tot: f64 = y_true[..n].iter().map(|t| (t - mean).powi(2)).sum();
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum();

    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Shuffle row indices with a fixed seed and split off `ceil(n * test_fraction)` for testing
///
/// Returns `(train, test)`. The test side is never the whole set when `n >= 2`.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let mut n_test = (n as f64 * test_fraction.clamp(0.0, 1.0)).ceil() as usize;
    if n >= 2 {
        n_test = n_test.min(n - 1);
    }
    let test = indices.split_off(n - n_test.min(n));
    (indices, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mse() {
        assert_eq!(mean_squared_error(&[1.0, 2.0], &[1.0, 4.0]), 2.0);
        assert_eq!(mean_squared_error(&[], &[]), 0.0);
    }

    #[test]
    fn test_r2_perfect_and_mean() {
        let y = [1.0, 2.0, 3.0];
        assert!((r2_score(&y, &y) - 1.0).abs() < 1e-12);
        assert!(r2_score(&y, &[2.0, 2.0, 2.0]).abs() < 1e-12);
    }

    #[test]
    fn test_split_sizes_and_disjoint() {
        let (train, test) = train_test_split(10, 0.2, 42);
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);

        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_rounds_test_side_up() {
        let (train, test) = train_test_split(6, 0.2, 1);
        assert_eq!(test.len(), 2);
        assert_eq!(train.len(), 4);
    }

    #[test]
    fn test_split_is_seeded() {
        assert_eq!(train_test_split(20, 0.2, 5), train_test_split(20, 0.2, 5));
    }
}
