//! K-means clustering
//!
//! k-means++ seeding, Lloyd iterations, and `n_init` restarts keeping the
//! run with the lowest inertia. Deterministic for a given seed.

use super::{check_width, ModelError};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KMeansParams {
    pub k: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            k: 8,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeans {
    pub params: KMeansParams,
    centroids: Vec<Vec<f64>>,
    inertia: f64,
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest(centroids: &[Vec<f64>], row: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_distance(c, row);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

impl KMeans {
    pub fn new(params: KMeansParams) -> Self {
        Self {
            params,
            centroids: Vec::new(),
            inertia: 0.0,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub fn centroids(&self) -> &[Vec<f64>] {
        &self.centroids
    }

    /// Sum of squared distances of training rows to their centroid
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn fit(&mut self, x: &Array2<f64>) -> Result<(), ModelError> {
        let rows: Vec<Vec<f64>> = x.rows().into_iter().map(|r| r.to_vec()).collect();
        let k = self.params.k.max(1);
        if rows.is_empty() {
            return Err(ModelError::EmptyInput);
        }
        if rows.len() < k {
            return Err(ModelError::InsufficientData {
                needed: k,
                got: rows.len(),
            });
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut best: Option<(Vec<Vec<f64>>, f64)> = None;

        for _ in 0..self.params.n_init.max(1) {
            let (centroids, inertia) = self.run_once(&rows, k, &mut rng);
            if best.as_ref().map_or(true, |(_, b)| inertia < *b) {
                best = Some((centroids, inertia));
            }
        }

        let (centroids, inertia) = best.ok_or(ModelError::EmptyInput)?;
        self.centroids = centroids;
        self.inertia = inertia;
        Ok(())
    }

    fn seed_centroids(rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
        let mut centroids = vec![rows[rng.gen_range(0..rows.len())].clone()];
        while centroids.len() < k {
            let weights: Vec<f64> = rows.iter().map(|r| nearest(&centroids, r).1).collect();
            let total: f64 = weights.iter().sum();
            if total <= 0.0 {
                // Fewer distinct points than clusters: reuse a random row
                centroids.push(rows[rng.gen_range(0..rows.len())].clone());
                continue;
            }
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = rows.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            centroids.push(rows[chosen].clone());
        }
        centroids
    }

    fn run_once(&self, rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> (Vec<Vec<f64>>, f64) {
        let dim = rows[0].len();
        let mut centroids = Self::seed_centroids(rows, k, rng);
        let mut labels = vec![0usize; rows.len()];

        for _ in 0..self.params.max_iter.max(1) {
            for (i, row) in rows.iter().enumerate() {
                labels[i] = nearest(&centroids, row).0;
            }

            let mut sums = vec![vec![0.0; dim]; k];
            let mut counts = vec![0usize; k];
            for (row, &label) in rows.iter().zip(&labels) {
                counts[label] += 1;
                for (s, v) in sums[label].iter_mut().zip(row) {
                    *s += v;
                }
            }

            let mut shift = 0.0;
            for c in 0..k {
                if counts[c] == 0 {
                    // Empty cluster keeps its previous centroid
                    continue;
                }
                let updated: Vec<f64> = sums[c].iter().map(|s| s / counts[c] as f64).collect();
                shift += squared_distance(&centroids[c], &updated);
                centroids[c] = updated;
            }

            if shift <= self.params.tol {
                break;
            }
        }

        let inertia = rows.iter().map(|r| nearest(&centroids, r).1).sum();
        (centroids, inertia)
    }

    /// Index of the closest centroid
    pub fn predict_row(&self, row: &[f64]) -> Result<usize, ModelError> {
        let first = self.centroids.first().ok_or(ModelError::NotFitted)?;
        check_width(first.len(), row)?;
        Ok(nearest(&self.centroids, row).0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::to_matrix;

    fn two_blobs() -> Array2<f64> {
        let mut rows = Vec::new();
        for i in 0..10 {
            let jitter = i as f64 * 0.01;
            rows.push(vec![0.0 + jitter, 0.0 - jitter]);
            rows.push(vec![10.0 - jitter, 10.0 + jitter]);
        }
        to_matrix(&rows).unwrap()
    }

    #[test]
    fn test_separates_blobs() {
        let mut km = KMeans::new(KMeansParams {
            k: 2,
            ..Default::default()
        });
        km.fit(&two_blobs()).unwrap();

        let a = km.predict_row(&[0.1, 0.1]).unwrap();
        let b = km.predict_row(&[9.9, 9.9]).unwrap();
        assert_ne!(a, b);
        assert!(km.inertia() < 1.0);
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let params = KMeansParams {
            k: 3,
            seed: 9,
            ..Default::default()
        };
        let mut a = KMeans::new(params);
        let mut b = KMeans::new(params);
        a.fit(&two_blobs()).unwrap();
        b.fit(&two_blobs()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_too_few_rows() {
        let x = to_matrix(&[vec![1.0], vec![2.0]]).unwrap();
        let mut km = KMeans::new(KMeansParams {
            k: 5,
            ..Default::default()
        });
        assert_eq!(
            km.fit(&x),
            Err(ModelError::InsufficientData { needed: 5, got: 2 })
        );
    }

    #[test]
    fn test_predict_before_fit() {
        let km = KMeans::new(KMeansParams::default());
        assert_eq!(km.predict_row(&[0.0]), Err(ModelError::NotFitted));
    }
}
