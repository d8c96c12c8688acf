//! Synthetic catalog and respondents for simulation and tests
//!
//! Respondents answer the questionnaire at random (seeded) and rate beverages
//! and presentations through a hidden preference function plus uniform noise.
//! Feeding them to an [`Engine`] gives the models something real to learn.

use crate::answers::{OrdinalCategory, Profile, Signal, CATEGORY_MATCHERS};
use crate::engine::Engine;
use crate::types::{
    clamp_rating, Answer, BeverageCategory, BeverageRecord, CalorieLevel, FlavorProfile,
    PresentationRecord, SizeCategory, UserResponseSet,
};
use anyhow::Result;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Configuration for the synthetic data generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub respondents: usize,
    /// Presentation ratings per respondent
    pub presentation_ratings: usize,
    /// Half-width of the uniform rating noise
    pub noise: f64,
    /// Fraction of respondents who never drink sodas
    pub non_consumer_rate: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            respondents: 40,
            presentation_ratings: 4,
            noise: 0.3,
            non_consumer_rate: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationRating {
    pub beverage_id: String,
    pub presentation_index: usize,
    pub rating: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Respondent {
    pub responses: UserResponseSet,
    /// (beverage id, rating) for every catalog beverage
    pub ratings: Vec<(String, f64)>,
    pub presentation_ratings: Vec<PresentationRating>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticData {
    pub catalog: Vec<BeverageRecord>,
    pub respondents: Vec<Respondent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedReport {
    pub samples: usize,
    pub ratings: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub respondents: usize,
    pub samples: usize,
    pub presentation_ratings: usize,
    pub preference_trained: bool,
    pub presentation_trained: bool,
    /// Mean absolute error against the hidden preferences of fresh respondents
    pub holdout_mae: f64,
}

// ============================================================================
// Catalog
// ============================================================================

struct CatalogEntry {
    id: &'static str,
    name: &'static str,
    category: BeverageCategory,
    flavor: FlavorProfile,
    sweetness: f64,
    calories: CalorieLevel,
    real_soda: bool,
    energizing: bool,
    ml_categories: &'static [&'static str],
    /// (volume ml, price)
    presentations: &'static [(u32, f64)],
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        id: "cola_clasica",
        name: "Cola Clásica",
        category: BeverageCategory::Cola,
        flavor: FlavorProfile::ClassicSweet,
        sweetness: 9.0,
        calories: CalorieLevel::High,
        real_soda: true,
        energizing: false,
        ml_categories: &["clasico"],
        presentations: &[(237, 12.0), (600, 18.0), (2000, 35.0), (3000, 45.0)],
    },
    CatalogEntry {
        id: "cola_cero",
        name: "Cola Cero",
        category: BeverageCategory::Cola,
        flavor: FlavorProfile::ClassicSweet,
        sweetness: 6.0,
        calories: CalorieLevel::Zero,
        real_soda: true,
        energizing: false,
        ml_categories: &["sin_azucar"],
        presentations: &[(355, 15.0), (600, 19.0), (2000, 36.0)],
    },
    CatalogEntry {
        id: "limon_burbujas",
        name: "Limón Burbujas",
        category: BeverageCategory::Citrus,
        flavor: FlavorProfile::CitrusRefreshing,
        sweetness: 6.0,
        calories: CalorieLevel::Medium,
        real_soda: true,
        energizing: false,
        ml_categories: &["refrescante"],
        presentations: &[(355, 14.0), (600, 17.0), (1500, 28.0)],
    },
    CatalogEntry {
        id: "naranja_fiesta",
        name: "Naranja Fiesta",
        category: BeverageCategory::Fruit,
        flavor: FlavorProfile::TropicalFruit,
        sweetness: 8.0,
        calories: CalorieLevel::High,
        real_soda: true,
        energizing: false,
        ml_categories: &["frutal"],
        presentations: &[(355, 14.0), (2000, 32.0)],
    },
    CatalogEntry {
        id: "voltaje",
        name: "Voltaje",
        category: BeverageCategory::Energy,
        flavor: FlavorProfile::EnergyFruit,
        sweetness: 7.0,
        calories: CalorieLevel::Medium,
        real_soda: true,
        energizing: true,
        ml_categories: &["energia"],
        presentations: &[(250, 30.0), (473, 42.0)],
    },
    CatalogEntry {
        id: "agua_manantial",
        name: "Agua de Manantial",
        category: BeverageCategory::Water,
        flavor: FlavorProfile::PureNatural,
        sweetness: 0.0,
        calories: CalorieLevel::Zero,
        real_soda: false,
        energizing: false,
        ml_categories: &["sin_azucar", "natural"],
        presentations: &[(500, 10.0), (1000, 14.0), (5000, 38.0)],
    },
    CatalogEntry {
        id: "jugo_verde",
        name: "Jugo Verde",
        category: BeverageCategory::Juice,
        flavor: FlavorProfile::HerbalRefreshing,
        sweetness: 3.0,
        calories: CalorieLevel::Low,
        real_soda: false,
        energizing: false,
        ml_categories: &["natural"],
        presentations: &[(300, 28.0), (1000, 55.0)],
    },
    CatalogEntry {
        id: "te_verde_limon",
        name: "Té Verde Limón",
        category: BeverageCategory::Tea,
        flavor: FlavorProfile::HerbalRefreshing,
        sweetness: 2.0,
        calories: CalorieLevel::VeryLow,
        real_soda: false,
        energizing: true,
        ml_categories: &["sin_azucar", "natural"],
        presentations: &[(500, 19.0), (1500, 35.0)],
    },
    CatalogEntry {
        id: "agua_mineral",
        name: "Agua Mineral",
        category: BeverageCategory::Water,
        flavor: FlavorProfile::PureNatural,
        sweetness: 0.0,
        calories: CalorieLevel::Zero,
        real_soda: false,
        energizing: false,
        ml_categories: &["sin_azucar"],
        presentations: &[(355, 16.0), (2000, 30.0)],
    },
    CatalogEntry {
        id: "toronja_light",
        name: "Toronja Light",
        category: BeverageCategory::Citrus,
        flavor: FlavorProfile::NaturalCitrus,
        sweetness: 4.0,
        calories: CalorieLevel::VeryLow,
        real_soda: true,
        energizing: false,
        ml_categories: &["sin_azucar"],
        presentations: &[(355, 14.0), (600, 18.0)],
    },
];

/// The built-in synthetic catalog
pub fn catalog() -> Vec<BeverageRecord> {
    CATALOG
        .iter()
        .map(|e| {
            let mut b = BeverageRecord::new(e.id, e.name);
            b.category = e.category;
            b.flavor = e.flavor;
            b.sweetness = e.sweetness;
            b.calories = e.calories;
            b.is_real_soda = e.real_soda;
            b.is_energizing = e.energizing;
            b.base_price = e.presentations.first().map(|p| p.1).unwrap_or(25.0);
            b.ml_categories = e.ml_categories.iter().map(|s| s.to_string()).collect();
            b.presentations = e
                .presentations
                .iter()
                .map(|&(ml, price)| PresentationRecord::new(ml, price))
                .collect();
            b
        })
        .collect()
}

// ============================================================================
// Respondents
// ============================================================================

const PURCHASE_CONTEXTS: [&str; 5] = ["familiar", "economico", "premium", "individual", "indiferente"];
const PRIORITIES: [&str; 3] = ["prioridad_sabor", "prioridad_salud", "sin_preferencia"];

fn random_responses(rng: &mut StdRng, index: usize, non_consumer_rate: f64) -> UserResponseSet {
    let mut answers = Vec::new();
    for matcher in &CATEGORY_MATCHERS {
        let value = if matcher.category == OrdinalCategory::Consumption {
            if rng.gen_bool(non_consumer_rate.clamp(0.0, 1.0)) {
                "nunca"
            } else {
                matcher.domain[rng.gen_range(1..5)]
            }
        } else {
            matcher.domain[rng.gen_range(0..5)]
        };
        answers.push(Answer::new(matcher.aliases[0], value));
    }
    answers.push(Answer::new(
        "contexto_compra",
        PURCHASE_CONTEXTS[rng.gen_range(0..PURCHASE_CONTEXTS.len())],
    ));
    answers.push(Answer::new("prioridad", PRIORITIES[rng.gen_range(0..PRIORITIES.len())]));

    for answer in &mut answers {
        answer.response_time = Some(rng.gen_range(3.0..15.0));
    }
    UserResponseSet::new(Some(format!("sim_{:04}", index)), answers)
}

/// Hidden beverage preference the models should recover
pub fn hidden_rating(profile: &Profile, beverage: &BeverageRecord) -> f64 {
    let wanted = profile
        .ordinal(OrdinalCategory::Sweetness)
        .map(|i| i as f64 * 2.5)
        .unwrap_or(5.0);
    let mut rating = 4.5 - (wanted - beverage.sweetness).abs() * 0.35;

    if profile.ordinal(OrdinalCategory::HealthImportance).unwrap_or(2) >= 3 {
        rating += if beverage.calories.is_light() { 0.6 } else { -0.8 };
    }
    if profile.has(Signal::Active) && beverage.is_energizing {
        rating += 0.5;
    }
    if profile.needs_energy() && beverage.is_energizing {
        rating += 0.4;
    }
    if profile.ordinal(OrdinalCategory::Consumption) == Some(0) {
        rating = if beverage.is_real_soda { 1.5 } else { rating + 1.0 };
    }
    clamp_rating(rating)
}

/// Hidden presentation preference
pub fn hidden_presentation_rating(profile: &Profile, presentation: &PresentationRecord) -> f64 {
    let size = presentation.size_category();
    let price_per_ml = presentation.price_per_ml();
    let mut rating = 3.0;

    if profile.has(Signal::Family) {
        match size {
            SizeCategory::Familiar | SizeCategory::Bulk => rating += 1.2,
            SizeCategory::Mini => rating -= 0.6,
            _ => {}
        }
    }
    if profile.has(Signal::Economical) {
        if price_per_ml < 0.05 {
            rating += 0.8;
        } else if price_per_ml > 0.1 {
            rating -= 1.0;
        }
    }
    if profile.has(Signal::Premium) && price_per_ml > 0.1 {
        rating += 0.6;
    }
    if profile.has(Signal::Active) && matches!(size, SizeCategory::Mini | SizeCategory::Individual) {
        rating += 0.6;
    }
    clamp_rating(rating)
}

fn noisy(rng: &mut StdRng, rating: f64, noise: f64) -> f64 {
    if noise <= 0.0 {
        return rating;
    }
    clamp_rating(rating + rng.gen_range(-noise..=noise))
}

/// Generate the catalog and `config.respondents` respondents
pub fn generate(config: &SyntheticConfig) -> SyntheticData {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let catalog = catalog();
    let respondents = (0..config.respondents)
        .map(|i| generate_respondent(&mut rng, &catalog, config, i))
        .collect();
    SyntheticData {
        catalog,
        respondents,
    }
}

fn generate_respondent(
    rng: &mut StdRng,
    catalog: &[BeverageRecord],
    config: &SyntheticConfig,
    index: usize,
) -> Respondent {
    let responses = random_responses(rng, index, config.non_consumer_rate);
    let profile = Profile::parse(&responses);

    let ratings = catalog
        .iter()
        .map(|b| (b.id.clone(), noisy(rng, hidden_rating(&profile, b), config.noise)))
        .collect();

    let presentation_ratings = (0..config.presentation_ratings)
        .filter_map(|_| {
            let beverage = catalog.choose(rng)?;
            if beverage.presentations.is_empty() {
                return None;
            }
            let presentation_index = rng.gen_range(0..beverage.presentations.len());
            let hidden =
                hidden_presentation_rating(&profile, &beverage.presentations[presentation_index]);
            Some(PresentationRating {
                beverage_id: beverage.id.clone(),
                presentation_index,
                rating: noisy(rng, hidden, config.noise),
            })
        })
        .collect();

    Respondent {
        responses,
        ratings,
        presentation_ratings,
    }
}

/// Append every synthetic rating to the engine's corpus
pub fn feed(engine: &Engine, data: &SyntheticData) -> Result<FeedReport> {
    let mut report = FeedReport::default();
    for respondent in &data.respondents {
        for (beverage_id, rating) in &respondent.ratings {
            let Some(beverage) = data.catalog.iter().find(|b| &b.id == beverage_id) else {
                continue;
            };
            engine.add_training_data(&respondent.responses, beverage, *rating)?;
            report.samples += 1;
        }
        for pr in &respondent.presentation_ratings {
            let Some(beverage) = data.catalog.iter().find(|b| b.id == pr.beverage_id) else {
                continue;
            };
            let Some(presentation) = beverage.presentations.get(pr.presentation_index) else {
                continue;
            };
            engine.add_presentation_rating(
                &presentation.id_for(&beverage.id),
                &respondent.responses,
                beverage,
                presentation,
                pr.rating,
                serde_json::json!({ "source": "synthetic" }),
            )?;
            report.ratings += 1;
        }
    }
    Ok(report)
}

/// Feed, train, and score predictions against fresh respondents
pub fn simulate(engine: &Engine, config: &SyntheticConfig) -> Result<SimulationReport> {
    let data = generate(config);
    let fed = feed(engine, &data)?;
    let preference_trained = engine.train();
    let presentation_trained = engine.train_presentations();

    let holdout = generate(&SyntheticConfig {
        respondents: (config.respondents / 4).max(1),
        seed: config.seed.wrapping_add(1),
        noise: 0.0,
        ..config.clone()
    });
    let mut total_error = 0.0;
    let mut n = 0usize;
    for respondent in &holdout.respondents {
        let profile = Profile::parse(&respondent.responses);
        for beverage in &holdout.catalog {
            let predicted = engine.predict_preference(&respondent.responses, beverage);
            total_error += (predicted - hidden_rating(&profile, beverage)).abs();
            n += 1;
        }
    }
    let holdout_mae = if n == 0 { 0.0 } else { total_error / n as f64 };
    info!(
        respondents = config.respondents,
        samples = fed.samples,
        ratings = fed.ratings,
        holdout_mae,
        "Simulation complete"
    );

    Ok(SimulationReport {
        respondents: config.respondents,
        samples: fed.samples,
        presentation_ratings: fed.ratings,
        preference_trained,
        presentation_trained,
        holdout_mae,
    })
}
