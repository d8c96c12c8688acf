//! Preference predictor: how much will this user like this beverage (1-5)?
//!
//! Routing by user type:
//! - Non-consumers get a fixed health-first score
//! - Test users get a neutral score with a seeded exploration offset
//! - Everyone else gets the heuristic until a forest is trained, then the
//!   forest output plus a personalization pass
//!
//! Inference never fails: any model error is logged and the heuristic returned.

use crate::answers::{Profile, Signal};
use crate::features::{encode_preference_profile, PREFERENCE_DIM};
use crate::models::{
    mean_squared_error, select_rows, to_matrix, train_test_split, ForestParams, ModelError,
    RandomForestRegressor, Regressor,
};
use crate::types::{clamp_rating, BeverageCategory, BeverageRecord, CalorieLevel, UserType};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Exploration half-width for test users
const TEST_USER_JITTER: f64 = 0.8;
/// Holdout split kicks in at this many samples
const MIN_SPLIT_SAMPLES: usize = 5;
/// Weight of the forest when blending with the heuristic
const FOREST_BLEND: f64 = 0.7;

/// Forest hyperparameters for preference prediction
pub fn forest_params(seed: u64) -> ForestParams {
    ForestParams::new(100, 10, 5, 2, seed)
}

/// Result of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub samples: usize,
    pub holdout_mse: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencePredictor {
    forest: RandomForestRegressor,
    trained: bool,
}

impl PreferencePredictor {
    pub fn new(seed: u64) -> Self {
        Self {
            forest: RandomForestRegressor::new(forest_params(seed)),
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Fit on 18-dim preference rows
    ///
    /// With at least 5 rows, 20% is held out (seeded) and the holdout MSE reported.
    pub fn fit(
        &mut self,
        rows: &[Vec<f64>],
        ratings: &[f64],
        min_samples: usize,
    ) -> Result<TrainReport, ModelError> {
        if rows.len() < min_samples.max(1) {
            return Err(ModelError::InsufficientData {
                needed: min_samples.max(1),
                got: rows.len(),
            });
        }
        let x = to_matrix(rows)?;
        let mut forest = RandomForestRegressor::new(self.forest.params);

        let holdout_mse = if rows.len() >= MIN_SPLIT_SAMPLES {
            let (train, test) = train_test_split(rows.len(), 0.2, forest.params.seed);
            let y_train: Vec<f64> = train.iter().map(|&i| ratings[i]).collect();
            let y_test: Vec<f64> = test.iter().map(|&i| ratings[i]).collect();

            forest.fit(&select_rows(&x, &train), &y_train)?;
            let predicted = forest.predict_matrix(&select_rows(&x, &test))?;
            let mse = mean_squared_error(&y_test, &predicted);
            info!(samples = rows.len(), mse, "Preference model trained");
            Some(mse)
        } else {
            forest.fit(&x, ratings)?;
            info!(samples = rows.len(), "Preference model trained on limited data");
            None
        };

        self.forest = forest;
        self.trained = true;
        Ok(TrainReport {
            samples: rows.len(),
            holdout_mse,
        })
    }

    /// Predict a rating in [1, 5]
    pub fn predict<R: Rng>(
        &self,
        profile: &Profile,
        user_type: UserType,
        beverage: &BeverageRecord,
        rng: &mut R,
    ) -> f64 {
        match user_type {
            UserType::NonConsumer => non_consumer_score(profile, beverage),
            UserType::TestUser => test_user_score(beverage, rng),
            UserType::Regular if !self.trained => heuristic_score(profile, beverage),
            other => match self.predict_trained(profile, other, beverage) {
                Ok(score) => score,
                Err(e) => {
                    warn!(beverage = %beverage.id, error = %e, "Preference inference failed, using heuristic");
                    heuristic_score(profile, beverage)
                }
            },
        }
    }

    fn predict_trained(
        &self,
        profile: &Profile,
        user_type: UserType,
        beverage: &BeverageRecord,
    ) -> Result<f64, ModelError> {
        let row = encode_preference_profile(profile, beverage);
        debug_assert_eq!(row.len(), PREFERENCE_DIM);
        let forest = self.forest.predict_row(&row)?;

        let blended = match user_type {
            UserType::Regular => forest,
            _ => FOREST_BLEND * forest + (1.0 - FOREST_BLEND) * heuristic_score(profile, beverage),
        };
        Ok(clamp_rating(personalize(blended, profile, beverage)))
    }
}

/// Score for users who do not drink sodas
pub fn non_consumer_score(profile: &Profile, beverage: &BeverageRecord) -> f64 {
    let score = if beverage.is_real_soda {
        let mut s = 1.5;
        if beverage.sweetness >= 7.0 {
            s -= 0.3;
        }
        s
    } else {
        let mut s = 4.0;
        if beverage.calories.is_light() {
            s += 0.8;
        }
        if matches!(
            beverage.category,
            BeverageCategory::Water | BeverageCategory::Tea | BeverageCategory::Juice
        ) {
            s += 0.5;
        }
        if profile.has(Signal::Active) {
            s += 0.3;
        }
        if profile.has(Signal::Natural) {
            s += 0.4;
        }
        s
    };
    clamp_rating(score)
}

/// Neutral score with a bounded offset, so test users see variety
pub fn test_user_score<R: Rng>(beverage: &BeverageRecord, rng: &mut R) -> f64 {
    let mut score = 3.0;
    if matches!(beverage.category, BeverageCategory::Cola | BeverageCategory::Citrus) {
        score += 0.5;
    }
    score += rng.gen_range(-TEST_USER_JITTER..=TEST_USER_JITTER);
    clamp_rating(score)
}

/// Rule-based score used before any model is trained
pub fn heuristic_score(profile: &Profile, beverage: &BeverageRecord) -> f64 {
    let sweetness = beverage.sweetness;
    let mut score = 3.0;

    let sweetness_match = if profile.has(Signal::VerySweet) && sweetness >= 8.0 {
        1.0
    } else if profile.has(Signal::Natural) && sweetness <= 3.0 {
        1.0
    } else if profile.has(Signal::Balanced) && (4.0..=6.0).contains(&sweetness) {
        0.8
    } else {
        0.0
    };
    score += sweetness_match * 1.5;

    if profile.has(Signal::HealthImportant) {
        score += if beverage.is_real_soda { -0.5 } else { 1.0 };
    }
    if profile.needs_energy() && beverage.is_energizing {
        score += 0.8;
    }
    if profile.has(Signal::Active) && !beverage.is_real_soda {
        score += 0.5;
    }

    clamp_rating(score)
}

/// Answer-driven adjustments on top of a model prediction (not clamped)
pub fn personalize(prediction: f64, profile: &Profile, beverage: &BeverageRecord) -> f64 {
    let sweetness = beverage.sweetness;
    let mut p = prediction;

    if profile.has(Signal::Active) {
        if beverage.is_energizing {
            p += 0.8;
        } else if !beverage.is_real_soda {
            p += 0.6;
        } else if sweetness >= 8.0 {
            p -= 0.4;
        }
    }

    if profile.has(Signal::VerySweet) {
        if sweetness >= 8.0 {
            p += 1.0;
        } else if sweetness <= 3.0 {
            p -= 0.7;
        }
    } else if profile.prefers_natural() {
        if sweetness <= 3.0 {
            p += 1.0;
        } else if sweetness >= 7.0 {
            p -= 0.8;
        }
    }

    if profile.has(Signal::HealthVeryImportant) {
        if !beverage.is_real_soda {
            p += 1.2;
        } else if beverage.calories == CalorieLevel::High {
            p -= 0.9;
        }
    }

    if profile.needs_energy() {
        if beverage.is_energizing {
            p += 0.7;
        } else if beverage.category == BeverageCategory::Tea {
            p += 0.5;
        }
    }

    if profile.has(Signal::Morning) {
        if beverage.is_energizing {
            p += 0.6;
        } else if matches!(beverage.category, BeverageCategory::Water | BeverageCategory::Juice) {
            p += 0.4;
        }
    }

    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserResponseSet;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn profile(pairs: &[(&str, &str)]) -> Profile {
        Profile::parse(&UserResponseSet::from_pairs(pairs.iter().copied()))
    }

    fn water() -> BeverageRecord {
        let mut b = BeverageRecord::new("agua", "Agua");
        b.category = BeverageCategory::Water;
        b.calories = CalorieLevel::Zero;
        b.is_real_soda = false;
        b.sweetness = 0.0;
        b
    }

    fn sweet_cola() -> BeverageRecord {
        let mut b = BeverageRecord::new("cola", "Cola Clasica");
        b.sweetness = 9.0;
        b.calories = CalorieLevel::High;
        b
    }

    #[test]
    fn test_non_consumer_water_scores_five() {
        let p = profile(&[("consumo_base", "nunca")]);
        let predictor = PreferencePredictor::new(42);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(predictor.predict(&p, UserType::NonConsumer, &water(), &mut rng), 5.0);
    }

    #[test]
    fn test_non_consumer_sweet_soda() {
        let p = profile(&[("consumo_base", "nunca")]);
        assert!((non_consumer_score(&p, &sweet_cola()) - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_test_user_offset_is_bounded_and_seeded() {
        let cola = BeverageRecord::new("c", "Cola");
        for seed in 0..50 {
            let a = test_user_score(&cola, &mut StdRng::seed_from_u64(seed));
            let b = test_user_score(&cola, &mut StdRng::seed_from_u64(seed));
            assert_eq!(a, b);
            assert!((2.7..=4.3).contains(&a), "{}", a);
        }
    }

    #[test]
    fn test_heuristic_examples() {
        let sweet_lover = profile(&[("preferencias_dulzura", "muy_dulce")]);
        assert_eq!(heuristic_score(&sweet_lover, &sweet_cola()), 4.5);

        let health = profile(&[("salud_importancia", "importante"), ("fisico", "activo")]);
        // 3.0 + 1.0 (non-soda, health) + 0.5 (active, non-soda)
        assert_eq!(heuristic_score(&health, &water()), 4.5);
        // 3.0 - 0.5
        assert_eq!(heuristic_score(&health, &sweet_cola()), 2.5);
    }

    #[test]
    fn test_untrained_regular_uses_heuristic() {
        let p = profile(&[("preferencias_dulzura", "equilibrado")]);
        let mut b = BeverageRecord::new("x", "X");
        b.sweetness = 5.0;
        let predictor = PreferencePredictor::new(42);
        let mut rng = StdRng::seed_from_u64(0);
        assert!((predictor.predict(&p, UserType::Regular, &b, &mut rng) - 4.2).abs() < 1e-12);
    }

    #[test]
    fn test_personalization_moves_in_expected_direction() {
        let p = profile(&[("fisico", "activo"), ("temporal", "manana")]);
        // active + non-soda (+0.6), morning + water (+0.4)
        assert!((personalize(3.0, &p, &water()) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_fit_requires_min_samples() {
        let mut predictor = PreferencePredictor::new(42);
        let rows = vec![vec![0.0; PREFERENCE_DIM]; 3];
        assert_eq!(
            predictor.fit(&rows, &[3.0, 3.0, 3.0], 10),
            Err(ModelError::InsufficientData { needed: 10, got: 3 })
        );
        assert!(!predictor.is_trained());
    }

    #[test]
    fn test_trained_prediction_stays_in_range() {
        let users = [
            profile(&[("preferencias_dulzura", "muy_dulce"), ("fisico", "sedentario")]),
            profile(&[("preferencias_dulzura", "natural"), ("fisico", "muy_activo")]),
        ];
        let drinks = [water(), sweet_cola()];
        let mut rows = Vec::new();
        let mut ratings = Vec::new();
        for _ in 0..5 {
            for (ui, u) in users.iter().enumerate() {
                for (bi, b) in drinks.iter().enumerate() {
                    rows.push(encode_preference_profile(u, b));
                    ratings.push(if ui == bi { 5.0 } else { 1.0 });
                }
            }
        }

        let mut predictor = PreferencePredictor::new(42);
        let report = predictor.fit(&rows, &ratings, 10).unwrap();
        assert_eq!(report.samples, 20);
        assert!(report.holdout_mse.is_some());

        let mut rng = StdRng::seed_from_u64(0);
        for u in &users {
            for b in &drinks {
                let score = predictor.predict(u, UserType::Regular, b, &mut rng);
                assert!((1.0..=5.0).contains(&score));
            }
        }
    }

    #[test]
    fn test_width_mismatch_falls_back_to_heuristic() {
        let mut predictor = PreferencePredictor::new(42);
        let rows = vec![vec![1.0, 2.0]; 12];
        let ratings = vec![4.0; 12];
        predictor.fit(&rows, &ratings, 10).unwrap();

        let p = profile(&[("preferencias_dulzura", "muy_dulce")]);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            predictor.predict(&p, UserType::Regular, &sweet_cola(), &mut rng),
            heuristic_score(&p, &sweet_cola())
        );
    }
}
