//! Online preference ledger for presentations
//!
//! Tracks, per session, ratings by size bin and a price-sensitivity
//! accumulator, plus rolling rating stats per presentation. Updated on every
//! presentation rating; read by the presentation scorer for contextual
//! adjustments.

use crate::types::{RatingStats, SizeCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Price per ml above which a presentation counts as expensive
pub const HIGH_PRICE_PER_ML: f64 = 0.08;
/// High rating of an expensive presentation lowers sensitivity
pub const SENSITIVITY_DECREASE: f64 = 0.1;
/// Low rating of an expensive presentation raises sensitivity
pub const SENSITIVITY_INCREASE: f64 = 0.2;

const LIKED_SIZE_MEAN: f64 = 3.5;
const DISLIKED_SIZE_MEAN: f64 = 2.5;
const SIZE_ADJUSTMENT: f64 = 0.3;
const SENSITIVITY_WEIGHT: f64 = 0.5;

const PREFERRED_SIZE_MEAN: f64 = 4.0;
const AVOIDED_SIZE_MEAN: f64 = 2.0;

/// One session's accumulated presentation preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub size_ratings: BTreeMap<SizeCategory, Vec<f64>>,
    pub price_sensitivity: f64,
    pub total_ratings: u32,
    pub last_activity: DateTime<Utc>,
}

impl UserPreferences {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            size_ratings: BTreeMap::new(),
            price_sensitivity: 0.0,
            total_ratings: 0,
            last_activity: now,
        }
    }

    pub fn size_mean(&self, size: SizeCategory) -> Option<f64> {
        let ratings = self.size_ratings.get(&size)?;
        if ratings.is_empty() {
            return None;
        }
        Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
    }
}

/// Summary of one size bin in an analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeSummary {
    pub category: SizeCategory,
    pub average_rating: f64,
    pub total_ratings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SizePreferenceAnalysis {
    NoData,
    Analyzed {
        preferred_sizes: Vec<SizeSummary>,
        avoided_sizes: Vec<SizeSummary>,
        price_sensitivity: f64,
        total_ratings: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceLedger {
    sessions: BTreeMap<String, UserPreferences>,
    presentation_stats: BTreeMap<String, RatingStats>,
}

impl PreferenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a (clamped) rating
    ///
    /// Presentation stats always update; the session ledger only when a
    /// session id is present.
    pub fn record(
        &mut self,
        session_id: Option<&str>,
        presentation_id: &str,
        size: SizeCategory,
        price_per_ml: f64,
        rating: f64,
        now: DateTime<Utc>,
    ) {
        self.presentation_stats
            .entry(presentation_id.to_string())
            .or_default()
            .record(rating);

        let Some(session) = session_id else {
            return;
        };

        let prefs = self
            .sessions
            .entry(session.to_string())
            .or_insert_with(|| UserPreferences::new(now));

        prefs.size_ratings.entry(size).or_default().push(rating);

        if price_per_ml > HIGH_PRICE_PER_ML {
            if rating >= 4.0 {
                prefs.price_sensitivity -= SENSITIVITY_DECREASE;
            } else if rating <= 2.0 {
                prefs.price_sensitivity += SENSITIVITY_INCREASE;
            }
        }

        prefs.total_ratings += 1;
        prefs.last_activity = now;
    }

    pub fn session(&self, session_id: &str) -> Option<&UserPreferences> {
        self.sessions.get(session_id)
    }

    pub fn presentation_stats(&self, presentation_id: &str) -> Option<&RatingStats> {
        self.presentation_stats.get(presentation_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn presentation_count(&self) -> usize {
        self.presentation_stats.len()
    }

    /// Shift a model rating by what this session has told us so far
    pub fn contextual_adjustment(
        &self,
        base: f64,
        session_id: Option<&str>,
        size: SizeCategory,
        price_per_ml: f64,
    ) -> f64 {
        let Some(prefs) = session_id.and_then(|s| self.sessions.get(s)) else {
            return base;
        };

        let mut adjusted = base;
        if let Some(mean) = prefs.size_mean(size) {
            if mean > LIKED_SIZE_MEAN {
                adjusted += SIZE_ADJUSTMENT;
            } else if mean < DISLIKED_SIZE_MEAN {
                adjusted -= SIZE_ADJUSTMENT;
            }
        }
        if price_per_ml > HIGH_PRICE_PER_ML {
            adjusted += prefs.price_sensitivity * SENSITIVITY_WEIGHT;
        }
        adjusted
    }

    pub fn analyze(&self, session_id: &str) -> SizePreferenceAnalysis {
        let Some(prefs) = self.sessions.get(session_id) else {
            return SizePreferenceAnalysis::NoData;
        };

        let mut preferred_sizes = Vec::new();
        let mut avoided_sizes = Vec::new();
        for (category, ratings) in &prefs.size_ratings {
            let Some(average_rating) = prefs.size_mean(*category) else {
                continue;
            };
            let summary = SizeSummary {
                category: *category,
                average_rating,
                total_ratings: ratings.len(),
            };
            if average_rating >= PREFERRED_SIZE_MEAN {
                preferred_sizes.push(summary);
            } else if average_rating <= AVOIDED_SIZE_MEAN {
                avoided_sizes.push(summary);
            }
        }

        SizePreferenceAnalysis::Analyzed {
            preferred_sizes,
            avoided_sizes,
            price_sensitivity: prefs.price_sensitivity,
            total_ratings: prefs.total_ratings,
        }
    }
}
