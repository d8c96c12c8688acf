//! Presentation scoring: which size/price variant will this user rate best?
//!
//! Trained models (all on standardized 33-dim presentation vectors):
//! - rating forest
//! - price-preference gradient boosting (rating relative to price per ml)
//! - size-preference forest (rating scaled by volume)
//! - 6-cluster k-means over presentations
//!
//! Untrained, a rule-based score is used with a fixed confidence of 0.3.

use crate::answers::{Profile, Signal};
use crate::features::{encode_presentation, PRESENTATION_DIM};
use crate::ledger::PreferenceLedger;
use crate::models::{
    mean_squared_error, r2_score, select_rows, to_matrix, train_test_split, ForestParams,
    GradientBoostingParams, GradientBoostingRegressor, KMeans, KMeansParams, ModelError,
    RandomForestRegressor, Regressor, StandardScaler,
};
use crate::types::{
    clamp_rating, BeverageRecord, PresentationPrediction, PresentationRatingRecord,
    PresentationRecord, RankedPresentation, SizeCategory,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

pub const UNTRAINED_CONFIDENCE: f64 = 0.3;
pub const MAX_CONFIDENCE: f64 = 0.95;
pub const N_PRESENTATION_CLUSTERS: usize = 6;
/// Rating forest holdout metrics need at least this many ratings
const MIN_HOLDOUT_SAMPLES: usize = 10;

const CHEAP_PRICE_PER_ML: f64 = 0.05;
const PRICEY_PRICE_PER_ML: f64 = 0.1;

/// Result of a presentation training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationTrainReport {
    pub samples: usize,
    pub holdout_mse: Option<f64>,
    pub holdout_r2: Option<f64>,
    pub clustered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationScorer {
    scaler: StandardScaler,
    rating: RandomForestRegressor,
    price: GradientBoostingRegressor,
    size: RandomForestRegressor,
    clusters: Option<KMeans>,
    trained: bool,
}

/// Price-preference target: rating relative to price per ml
pub fn price_preference_target(rating: f64, price_per_ml: f64) -> f64 {
    rating / (price_per_ml * 100.0).max(1.0)
}

/// Size-preference target: rating weighted by litres
pub fn size_preference_target(rating: f64, volume_ml: u32) -> f64 {
    rating * f64::from(volume_ml) / 1000.0
}

impl PresentationScorer {
    pub fn new(seed: u64) -> Self {
        Self {
            scaler: StandardScaler::new(),
            rating: RandomForestRegressor::new(ForestParams::new(100, 10, 3, 2, seed)),
            price: GradientBoostingRegressor::new(GradientBoostingParams {
                n_estimators: 50,
                learning_rate: 0.1,
                max_depth: 6,
                min_samples_split: 2,
                min_samples_leaf: 1,
                seed,
            }),
            size: RandomForestRegressor::new(ForestParams::new(80, 8, 2, 1, seed)),
            clusters: None,
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Fit every presentation model on the rating corpus
    pub fn fit(
        &mut self,
        records: &[PresentationRatingRecord],
        min_samples: usize,
    ) -> Result<PresentationTrainReport, ModelError> {
        if records.len() < min_samples.max(1) {
            return Err(ModelError::InsufficientData {
                needed: min_samples.max(1),
                got: records.len(),
            });
        }

        let rows: Vec<Vec<f64>> = records.iter().map(|r| r.features.clone()).collect();
        let y_rating: Vec<f64> = records.iter().map(|r| r.rating).collect();
        let y_price: Vec<f64> = records
            .iter()
            .map(|r| price_preference_target(r.rating, r.price_per_ml()))
            .collect();
        let y_size: Vec<f64> = records
            .iter()
            .map(|r| size_preference_target(r.rating, r.volume_ml))
            .collect();

        let raw = to_matrix(&rows)?;
        let mut scaler = StandardScaler::new();
        scaler.fit(&raw)?;
        let x = scaler.transform(&raw)?;

        let seed = self.rating.params.seed;
        let mut rating = RandomForestRegressor::new(self.rating.params);
        let (holdout_mse, holdout_r2) = if records.len() >= MIN_HOLDOUT_SAMPLES {
            let (train, test) = train_test_split(records.len(), 0.2, seed);
            let y_train: Vec<f64> = train.iter().map(|&i| y_rating[i]).collect();
            let y_test: Vec<f64> = test.iter().map(|&i| y_rating[i]).collect();
            rating.fit(&select_rows(&x, &train), &y_train)?;
            let predicted = rating.predict_matrix(&select_rows(&x, &test))?;
            let mse = mean_squared_error(&y_test, &predicted);
            let r2 = r2_score(&y_test, &predicted);
            info!(mse, r2, "Presentation rating model trained");
            (Some(mse), Some(r2))
        } else {
            rating.fit(&x, &y_rating)?;
            info!("Presentation rating model trained on limited data");
            (None, None)
        };

        let mut price = GradientBoostingRegressor::new(self.price.params);
        price.fit(&x, &y_price)?;
        let mut size = RandomForestRegressor::new(self.size.params);
        size.fit(&x, &y_size)?;

        let clusters = if distinct_rows(&rows) >= N_PRESENTATION_CLUSTERS {
            let mut kmeans = KMeans::new(KMeansParams {
                k: N_PRESENTATION_CLUSTERS,
                seed,
                ..Default::default()
            });
            kmeans.fit(&x)?;
            info!("Presentation clustering trained");
            Some(kmeans)
        } else {
            None
        };

        let report = PresentationTrainReport {
            samples: records.len(),
            holdout_mse,
            holdout_r2,
            clustered: clusters.is_some(),
        };
        *self = Self {
            scaler,
            rating,
            price,
            size,
            clusters,
            trained: true,
        };
        info!(samples = report.samples, "Presentation scoring trained");
        Ok(report)
    }

    /// Score one presentation for a user
    ///
    /// `corpus_size` is the number of presentation ratings seen so far and
    /// drives confidence on the trained path.
    pub fn predict(
        &self,
        presentation: &PresentationRecord,
        beverage: &BeverageRecord,
        profile: &Profile,
        session_id: Option<&str>,
        ledger: &PreferenceLedger,
        corpus_size: usize,
    ) -> PresentationPrediction {
        if !self.trained {
            return heuristic_prediction(presentation, beverage, profile);
        }
        match self.predict_trained(presentation, beverage, profile, session_id, ledger, corpus_size)
        {
            Ok(prediction) => prediction,
            Err(e) => {
                warn!(
                    beverage = %beverage.id,
                    volume_ml = presentation.volume_ml,
                    error = %e,
                    "Presentation inference failed, using heuristic"
                );
                heuristic_prediction(presentation, beverage, profile)
            }
        }
    }

    fn predict_trained(
        &self,
        presentation: &PresentationRecord,
        beverage: &BeverageRecord,
        profile: &Profile,
        session_id: Option<&str>,
        ledger: &PreferenceLedger,
        corpus_size: usize,
    ) -> Result<PresentationPrediction, ModelError> {
        let features = encode_presentation(presentation, Some(beverage), Some(profile));
        debug_assert_eq!(features.len(), PRESENTATION_DIM);
        let scaled = self.scaler.transform_row(&features)?;

        let rating = self.rating.predict_row(&scaled)?;
        let price = self.price.predict_row(&scaled)?;
        let size = self.size.predict_row(&scaled)?;
        let cluster_id = match &self.clusters {
            Some(kmeans) => kmeans.predict_row(&scaled)?,
            None => 0,
        };

        let adjusted = ledger.contextual_adjustment(
            rating,
            session_id,
            presentation.size_category(),
            presentation.price_per_ml(),
        );

        Ok(PresentationPrediction {
            predicted_rating: clamp_rating(adjusted),
            price_preference_score: price,
            size_preference_score: size,
            cluster_id,
            confidence: (corpus_size as f64 / 100.0).min(MAX_CONFIDENCE),
        })
    }
}

fn distinct_rows(rows: &[Vec<f64>]) -> usize {
    rows.iter()
        .map(|r| r.iter().map(|v| v.to_bits()).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}

fn mentions_health(profile: &Profile) -> bool {
    profile.has_any(&[
        Signal::HealthImportant,
        Signal::HealthFactor,
        Signal::PriorityHealth,
        Signal::AvoidsForHealth,
    ])
}

/// Rule-based presentation score
pub fn heuristic_prediction(
    presentation: &PresentationRecord,
    beverage: &BeverageRecord,
    profile: &Profile,
) -> PresentationPrediction {
    let size = presentation.size_category();
    let price_per_ml = presentation.price_per_ml();
    let mut score = 3.0;

    if profile.has(Signal::Active) {
        match size {
            SizeCategory::Mini | SizeCategory::Individual => score += 0.5,
            SizeCategory::Familiar => score -= 0.3,
            _ => {}
        }
    }

    if profile.has(Signal::Family) {
        match size {
            SizeCategory::Familiar => score += 0.8,
            SizeCategory::Mini => score -= 0.4,
            _ => {}
        }
    }

    if profile.has(Signal::Economical) {
        if price_per_ml < CHEAP_PRICE_PER_ML {
            score += 0.6;
        } else if price_per_ml > PRICEY_PRICE_PER_ML {
            score -= 0.7;
        }
    }

    if profile.has(Signal::Premium) && price_per_ml > PRICEY_PRICE_PER_ML {
        score += 0.5;
    }

    if beverage.has_category("sin_azucar") && mentions_health(profile) {
        score += 0.4;
    }

    PresentationPrediction {
        predicted_rating: clamp_rating(score),
        price_preference_score: 3.0,
        size_preference_score: 3.0,
        cluster_id: 0,
        confidence: UNTRAINED_CONFIDENCE,
    }
}

/// Score every presentation, rank by rating * confidence (stable, descending)
pub fn rank_presentations(
    scorer: &PresentationScorer,
    beverages: &[BeverageRecord],
    profile: &Profile,
    session_id: Option<&str>,
    ledger: &PreferenceLedger,
    corpus_size: usize,
    top_n: usize,
) -> Vec<RankedPresentation> {
    let mut ranked: Vec<RankedPresentation> = beverages
        .iter()
        .flat_map(move |b| {
            b.presentations.iter().map(move |p| {
                let prediction = scorer.predict(p, b, profile, session_id, ledger, corpus_size);
                RankedPresentation {
                    beverage_id: b.id.clone(),
                    beverage_name: b.name.clone(),
                    presentation_id: p.id_for(&b.id),
                    presentation: p.clone(),
                    combined_score: prediction.predicted_rating * prediction.confidence,
                    prediction,
                }
            })
        })
        .collect();

    ranked.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
    ranked.truncate(top_n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserResponseSet;
    use chrono::Utc;

    fn profile(pairs: &[(&str, &str)]) -> Profile {
        Profile::parse(&UserResponseSet::from_pairs(pairs.iter().copied()))
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }

    fn soda_with_sizes() -> BeverageRecord {
        let mut b = BeverageRecord::new("cola", "Cola");
        b.presentations = vec![
            PresentationRecord::new(237, 12.0),
            PresentationRecord::new(355, 15.0),
            PresentationRecord::new(600, 18.0),
            PresentationRecord::new(2000, 35.0),
            PresentationRecord::new(3000, 45.0),
        ];
        b
    }

    fn record(b: &BeverageRecord, p: &PresentationRecord, session: &str, rating: f64) -> PresentationRatingRecord {
        let prof = profile(&[("fisico", "activo")]);
        PresentationRatingRecord {
            presentation_id: p.id_for(&b.id),
            session_id: Some(session.to_string()),
            beverage_id: b.id.clone(),
            volume_ml: p.volume_ml,
            price: p.price,
            rating,
            features: encode_presentation(p, Some(b), Some(&prof)),
            encoder_version: crate::features::ENCODER_VERSION,
            timestamp: Utc::now(),
            context: serde_json::Value::Null,
        }
    }

    fn corpus(n_per_size: usize) -> (BeverageRecord, Vec<PresentationRatingRecord>) {
        let b = soda_with_sizes();
        let mut records = Vec::new();
        for i in 0..n_per_size {
            for (j, p) in b.presentations.iter().enumerate() {
                let rating = if j < 2 { 5.0 } else { 2.0 };
                records.push(record(&b, p, &format!("s{}", i), rating));
            }
        }
        (b, records)
    }

    #[test]
    fn test_untrained_confidence_is_exactly_point_three() {
        let scorer = PresentationScorer::new(42);
        let b = soda_with_sizes();
        let pred = scorer.predict(
            &b.presentations[0],
            &b,
            &Profile::default(),
            None,
            &PreferenceLedger::new(),
            500,
        );
        assert_eq!(pred.confidence, 0.3);
        assert_eq!(pred.cluster_id, 0);
        assert_eq!(pred.price_preference_score, 3.0);
    }

    #[test]
    fn test_heuristic_size_rules() {
        let b = soda_with_sizes();
        let active = profile(&[("fisico", "activo")]);
        let family = profile(&[("contexto", "compartir")]);

        let mini = &b.presentations[0];
        let familiar = &b.presentations[3];
        assert_close(heuristic_prediction(mini, &b, &active).predicted_rating, 3.5);
        assert_close(heuristic_prediction(familiar, &b, &active).predicted_rating, 2.7);
        assert_close(heuristic_prediction(familiar, &b, &family).predicted_rating, 3.8);
        assert_close(heuristic_prediction(mini, &b, &family).predicted_rating, 2.6);
    }

    #[test]
    fn test_heuristic_price_rules() {
        let b = soda_with_sizes();
        let cheap = PresentationRecord::new(2000, 20.0); // 0.01/ml
        let pricey = PresentationRecord::new(300, 60.0); // 0.2/ml
        let economical = profile(&[("presupuesto", "economico")]);
        let premium = profile(&[("presupuesto", "premium")]);

        assert_close(heuristic_prediction(&cheap, &b, &economical).predicted_rating, 3.6);
        assert_close(heuristic_prediction(&pricey, &b, &economical).predicted_rating, 2.3);
        assert_close(heuristic_prediction(&pricey, &b, &premium).predicted_rating, 3.5);
    }

    #[test]
    fn test_sugar_free_health_bonus() {
        let mut b = soda_with_sizes();
        b.ml_categories = vec!["sin_azucar".into()];
        let health = profile(&[("salud_importancia", "importante")]);
        let p = PresentationRecord::new(600, 18.0);
        assert_close(heuristic_prediction(&p, &b, &health).predicted_rating, 3.4);
    }

    #[test]
    fn test_fit_requires_min_samples() {
        let (_, records) = corpus(2);
        let mut scorer = PresentationScorer::new(42);
        assert_eq!(
            scorer.fit(&records, 20),
            Err(ModelError::InsufficientData { needed: 20, got: 10 })
        );
        assert!(!scorer.is_trained());
    }

    #[test]
    fn test_trained_prediction() {
        let (b, records) = corpus(5);
        let mut scorer = PresentationScorer::new(42);
        let report = scorer.fit(&records, 20).unwrap();
        assert_eq!(report.samples, 25);
        assert!(report.holdout_mse.is_some());

        let prof = profile(&[("fisico", "activo")]);
        let ledger = PreferenceLedger::new();
        let small = scorer.predict(&b.presentations[0], &b, &prof, None, &ledger, 25);
        let large = scorer.predict(&b.presentations[4], &b, &prof, None, &ledger, 25);
        assert!(small.predicted_rating > large.predicted_rating);
        assert_eq!(small.confidence, 0.25);
        assert!(small.cluster_id < N_PRESENTATION_CLUSTERS);

        let capped = scorer.predict(&b.presentations[0], &b, &prof, None, &ledger, 400);
        assert_eq!(capped.confidence, 0.95);
    }

    #[test]
    fn test_few_distinct_rows_skip_clustering() {
        let b = soda_with_sizes();
        let p = &b.presentations[1];
        let records: Vec<_> = (0..25).map(|i| record(&b, p, &format!("s{}", i), 4.0)).collect();
        let mut scorer = PresentationScorer::new(42);
        let report = scorer.fit(&records, 20).unwrap();
        assert!(!report.clustered);
        let pred = scorer.predict(p, &b, &profile(&[("fisico", "activo")]), None, &PreferenceLedger::new(), 25);
        assert_eq!(pred.cluster_id, 0);
    }

    #[test]
    fn test_ranking_is_sorted_and_truncated() {
        let b = soda_with_sizes();
        let scorer = PresentationScorer::new(42);
        let ranked = rank_presentations(
            &scorer,
            std::slice::from_ref(&b),
            &profile(&[("fisico", "activo")]),
            None,
            &PreferenceLedger::new(),
            0,
            3,
        );
        assert_eq!(ranked.len(), 3);
        assert!(ranked
            .windows(2)
            .all(|w| w[0].combined_score >= w[1].combined_score));
        assert_eq!(ranked[0].presentation_id, "cola_237");
    }
}
