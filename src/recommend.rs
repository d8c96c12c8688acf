//! Recommendation assembly
//!
//! One pass over the catalog:
//! 1. Classify the user and find their segment
//! 2. Predict every beverage, split real sodas from alternatives
//! 3. Pick the audience, which decides what is shown and how many
//! 4. Attach the best presentation and the reasons for each pick

use crate::answers::{Profile, Signal};
use crate::cascade::{self, CascadeDecision};
use crate::engine::Engine;
use crate::explain::explain;
use crate::types::{BeverageRecord, RankedPresentation, UserResponseSet, UserType};
use serde::{Deserialize, Serialize};
use std::slice;

/// Who we are recommending to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// Never drinks sodas: alternatives only
    NonConsumer,
    /// Drinks sodas but leans to alternatives: a longer list of alternatives
    PrefersAlternatives,
    /// Cascade says alternatives
    HealthConscious,
    /// Cascade says sodas
    Traditional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredBeverage {
    pub beverage_id: String,
    pub name: String,
    pub is_real_soda: bool,
    pub predicted_rating: f64,
    /// Display probability in [5, 95]
    pub probability: f64,
    pub reasons: Vec<String>,
    pub best_presentation: Option<RankedPresentation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub audience: Audience,
    pub user_type: UserType,
    pub cluster: usize,
    pub show_alternatives: bool,
    pub decision: CascadeDecision,
    pub sodas: Vec<ScoredBeverage>,
    pub alternatives: Vec<ScoredBeverage>,
}

/// Rating (1-5) as a display probability
pub fn probability(rating: f64) -> f64 {
    (rating * 20.0).clamp(5.0, 95.0)
}

pub fn audience(user_type: UserType, profile: &Profile, decision: &CascadeDecision) -> Audience {
    if user_type == UserType::NonConsumer || profile.has(Signal::NeverConsumes) {
        Audience::NonConsumer
    } else if profile.has(Signal::PrefersAlternatives) {
        Audience::PrefersAlternatives
    } else if decision.show_alternatives {
        Audience::HealthConscious
    } else {
        Audience::Traditional
    }
}

/// Build the recommendation for one user over a catalog
pub fn recommend(
    engine: &Engine,
    responses: &UserResponseSet,
    catalog: &[BeverageRecord],
) -> Recommendation {
    let profile = Profile::parse(responses);
    let user_type = engine.classify_user(responses);
    let cluster = engine.get_user_cluster(responses);
    let decision = cascade::evaluate_profile(&profile);
    let audience = audience(user_type, &profile, &decision);
    let config = engine.config();

    let mut scored: Vec<(&BeverageRecord, f64)> = catalog
        .iter()
        .map(|b| (b, engine.predict_preference(responses, b)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (sodas, alternatives): (Vec<_>, Vec<_>) = scored.into_iter().partition(|(b, _)| b.is_real_soda);

    let (soda_count, alternative_count) = match audience {
        Audience::NonConsumer => (0, config.max_alternatives_non_consumer),
        Audience::PrefersAlternatives => (0, config.max_alternatives * 2),
        Audience::HealthConscious => (0, config.max_alternatives),
        Audience::Traditional => (config.max_sodas, 0),
    };

    let finish = |picks: Vec<(&BeverageRecord, f64)>, n: usize| -> Vec<ScoredBeverage> {
        picks
            .into_iter()
            .take(n)
            .map(|(b, rating)| ScoredBeverage {
                beverage_id: b.id.clone(),
                name: b.name.clone(),
                is_real_soda: b.is_real_soda,
                predicted_rating: rating,
                probability: probability(rating),
                reasons: explain(&profile, b, rating),
                best_presentation: engine
                    .get_best_presentations_for_user(responses, slice::from_ref(b), 1)
                    .into_iter()
                    .next(),
            })
            .collect()
    };

    Recommendation {
        audience,
        user_type,
        cluster,
        show_alternatives: alternative_count > 0,
        decision,
        sodas: finish(sodas, soda_count),
        alternatives: finish(alternatives, alternative_count),
    }
}
