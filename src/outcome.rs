//! Rating outcomes - closing the learning loop
//!
//! Every rating a user gives:
//! 1. Lands in the training corpus
//! 2. Triggers a retrain when enough new samples have arrived
//! 3. Returns feedback describing what the engine learned
//!
//! Models only improve if ratings are recorded through here. Training runs
//! on the blocking pool under `train_timeout_secs`, so a slow fit never holds
//! up the caller; a fit that times out still swaps in when it finishes.

use crate::engine::Engine;
use crate::types::{
    BeverageRecord, ModelStats, PresentationRecord, SizeCategory, SystemStats, UserResponseSet,
};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// User-facing feedback for one rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub message: String,
    pub future_impact: String,
    pub learning: String,
    /// Size note, presentation ratings only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_note: Option<String>,
}

/// Outcome recording result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingOutcome {
    pub corpus_size: usize,
    pub main_model_retrained: bool,
    /// None for plain beverage ratings
    pub presentation_model_trained: Option<bool>,
    pub model_stats: ModelStats,
    pub presentation_stats: Option<SystemStats>,
    pub feedback: Feedback,
}

/// Record a beverage rating and retrain if needed
pub async fn record_beverage_rating(
    engine: &Engine,
    responses: &UserResponseSet,
    beverage: &BeverageRecord,
    rating: f64,
) -> Result<RatingOutcome> {
    let corpus_size = engine.add_training_data(responses, beverage, rating)?;
    let retrained = engine.retrain_if_needed_with_timeout(false).await;
    info!(beverage = %beverage.id, rating, retrained, "Beverage rating recorded");

    Ok(RatingOutcome {
        corpus_size,
        main_model_retrained: retrained,
        presentation_model_trained: None,
        model_stats: engine.get_model_stats(),
        presentation_stats: None,
        feedback: beverage_feedback(rating, beverage, retrained),
    })
}

/// Find a presentation by id anywhere in the catalog
pub fn find_presentation<'a>(
    catalog: &'a [BeverageRecord],
    presentation_id: &str,
) -> Option<(&'a BeverageRecord, &'a PresentationRecord)> {
    catalog.iter().find_map(|b| {
        b.presentations
            .iter()
            .find(|p| p.id_for(&b.id) == presentation_id)
            .map(|p| (b, p))
    })
}

/// Record a presentation rating
///
/// The rating also counts as a beverage rating for the main model.
pub async fn record_presentation_rating(
    engine: &Engine,
    responses: &UserResponseSet,
    catalog: &[BeverageRecord],
    presentation_id: &str,
    rating: f64,
    context: serde_json::Value,
) -> Result<RatingOutcome> {
    let Some((beverage, presentation)) = find_presentation(catalog, presentation_id) else {
        bail!("Presentation {} not found in catalog", presentation_id);
    };

    engine.add_presentation_rating(presentation_id, responses, beverage, presentation, rating, context)?;
    let presentation_trained = engine.train_presentations_with_timeout().await;

    let corpus_size = engine.add_training_data(responses, beverage, rating)?;
    let retrained = engine.retrain_if_needed_with_timeout(false).await;
    info!(
        presentation = presentation_id,
        rating,
        presentation_trained,
        retrained,
        "Presentation rating recorded"
    );

    Ok(RatingOutcome {
        corpus_size,
        main_model_retrained: retrained,
        presentation_model_trained: Some(presentation_trained),
        model_stats: engine.get_model_stats(),
        presentation_stats: Some(engine.get_system_stats()),
        feedback: presentation_feedback(rating, beverage, presentation, presentation_trained),
    })
}

fn beverage_feedback(rating: f64, beverage: &BeverageRecord, retrained: bool) -> Feedback {
    let name = &beverage.name;
    let (message, future_impact, mut learning) = if rating >= 4.0 {
        (
            format!("¡Genial! Me alegra que {} te haya gustado.", name),
            "Te recomendaré más bebidas parecidas.",
            "Aprendí que prefieres este tipo de bebida.".to_string(),
        )
    } else if rating >= 3.0 {
        (
            format!("{} te pareció aceptable.", name),
            "Buscaré opciones más cercanas a tu gusto.",
            "Registré tu opinión para afinar las sugerencias.".to_string(),
        )
    } else {
        (
            format!("Lamento que {} no te haya gustado.", name),
            "Evitaré sugerirte bebidas similares.",
            "Aprendí qué tipo de bebida no prefieres.".to_string(),
        )
    };
    if retrained {
        learning.push_str(" El modelo se actualizó con tu calificación.");
    }
    Feedback {
        message,
        future_impact: future_impact.to_string(),
        learning,
        size_note: None,
    }
}

fn presentation_feedback(
    rating: f64,
    beverage: &BeverageRecord,
    presentation: &PresentationRecord,
    trained: bool,
) -> Feedback {
    let label = format!("{} ({} ml)", beverage.name, presentation.volume_ml);
    let (message, future_impact, mut learning) = if rating >= 4.0 {
        (
            format!("¡Genial! {} fue de tu agrado.", label),
            "Priorizaré presentaciones de tamaño y precio similares.",
            "Aprendí tus preferencias de tamaño y precio.".to_string(),
        )
    } else if rating >= 3.0 {
        (
            format!("{} te pareció aceptable.", label),
            "Buscaré presentaciones que te queden mejor.",
            "Registré tu opinión sobre este tamaño.".to_string(),
        )
    } else {
        (
            format!("Lamento que {} no te haya gustado.", label),
            "Evitaré presentaciones parecidas.",
            "Aprendí qué tamaños y precios no prefieres.".to_string(),
        )
    };
    if trained {
        learning.push_str(" El modelo de presentaciones se actualizó.");
    }
    Feedback {
        message,
        future_impact: future_impact.to_string(),
        learning,
        size_note: Some(size_note(presentation.size_category()).to_string()),
    }
}

fn size_note(size: SizeCategory) -> &'static str {
    match size {
        SizeCategory::Mini => "Presentación mini: ideal para probar o un consumo rápido",
        SizeCategory::Individual => "Presentación individual: pensada para una persona",
        SizeCategory::Personal => "Presentación personal: rinde para hidratarte más tiempo",
        _ => "Presentación grande: buena para compartir",
    }
}
