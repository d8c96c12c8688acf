//! User segmentation into five clusters
//!
//! Before enough distinct users have rated, a rule-based assignment is used:
//! - 0: sweet tooth, sedentary
//! - 1: active and health/natural minded
//! - 2: stressed or busy
//! - 3: adventurous
//! - 4: everyone else

use crate::answers::{Profile, Signal};
use crate::features::encode_profile;
use crate::models::{to_matrix, KMeans, KMeansParams, ModelError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const N_SEGMENTS: usize = 5;
/// Distinct sessions and rows required before clustering is fitted
pub const MIN_SEGMENT_USERS: usize = 5;

pub fn kmeans_params(seed: u64) -> KMeansParams {
    KMeansParams {
        k: N_SEGMENTS,
        n_init: 10,
        max_iter: 300,
        tol: 1e-4,
        seed,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSegmenter {
    kmeans: Option<KMeans>,
    seed: u64,
}

impl UserSegmenter {
    pub fn new(seed: u64) -> Self {
        Self { kmeans: None, seed }
    }

    pub fn is_trained(&self) -> bool {
        self.kmeans.is_some()
    }

    /// Fit on 10-dim user rows; returns whether a model was fitted
    pub fn fit(&mut self, user_rows: &[Vec<f64>], distinct_users: usize) -> Result<bool, ModelError> {
        if distinct_users < MIN_SEGMENT_USERS || user_rows.len() < MIN_SEGMENT_USERS {
            info!(
                users = distinct_users,
                rows = user_rows.len(),
                "Not enough users to fit segments"
            );
            return Ok(false);
        }

        let x = to_matrix(user_rows)?;
        let mut kmeans = KMeans::new(kmeans_params(self.seed));
        kmeans.fit(&x)?;
        info!(users = distinct_users, inertia = kmeans.inertia(), "User segmenter trained");
        self.kmeans = Some(kmeans);
        Ok(true)
    }

    /// Segment id in [0, 4]
    pub fn cluster(&self, profile: &Profile) -> usize {
        let Some(kmeans) = &self.kmeans else {
            return heuristic_cluster(profile);
        };
        match kmeans.predict_row(&encode_profile(profile)) {
            Ok(c) => c.min(N_SEGMENTS - 1),
            Err(e) => {
                warn!(error = %e, "Segment inference failed, using heuristic");
                heuristic_cluster(profile)
            }
        }
    }
}

pub fn heuristic_cluster(profile: &Profile) -> usize {
    let sedentary = profile.has_any(&[Signal::Sedentary, Signal::Inactive]);
    if profile.has(Signal::Sweet) && sedentary {
        return 0;
    }
    if profile.has(Signal::Active) && profile.has_any(&[Signal::Natural, Signal::HealthImportant]) {
        return 1;
    }
    if profile.needs_energy() {
        return 2;
    }
    if profile.has(Signal::Adventurous) {
        return 3;
    }
    4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserResponseSet;

    fn profile(pairs: &[(&str, &str)]) -> Profile {
        Profile::parse(&UserResponseSet::from_pairs(pairs.iter().copied()))
    }

    #[test]
    fn test_heuristic_order() {
        assert_eq!(
            heuristic_cluster(&profile(&[("d", "muy_dulce"), ("f", "sedentario")])),
            0
        );
        assert_eq!(heuristic_cluster(&profile(&[("f", "activo"), ("d", "natural")])), 1);
        assert_eq!(heuristic_cluster(&profile(&[("a", "estresante")])), 2);
        assert_eq!(heuristic_cluster(&profile(&[("n", "aventurero")])), 3);
        assert_eq!(heuristic_cluster(&profile(&[])), 4);
    }

    #[test]
    fn test_lightly_sweet_is_not_cluster_zero() {
        let p = profile(&[("d", "poco_dulce"), ("f", "sedentario")]);
        assert_eq!(heuristic_cluster(&p), 4);
    }

    #[test]
    fn test_needs_five_users() {
        let mut seg = UserSegmenter::new(42);
        let rows = vec![vec![2.0; 10]; 8];
        assert_eq!(seg.fit(&rows, 4), Ok(false));
        assert!(!seg.is_trained());
    }

    #[test]
    fn test_trained_cluster_in_range() {
        let mut seg = UserSegmenter::new(42);
        let rows: Vec<Vec<f64>> = (0..12)
            .map(|i| (0..10).map(|j| ((i * 7 + j * 3) % 5) as f64).collect())
            .collect();
        assert_eq!(seg.fit(&rows, 12), Ok(true));
        let c = seg.cluster(&profile(&[("fisico", "activo")]));
        assert!(c < N_SEGMENTS);
    }
}
