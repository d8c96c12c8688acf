//! refresco-engine - Personalization Decision Engine
//!
//! Turns questionnaire answers into beverage recommendations:
//! which drinks a user will like, which size/price variant suits them, and
//! whether to surface real sodas or healthier alternatives at all.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use refresco_engine::{Engine, EngineConfig, UserResponseSet};
//! use refresco_engine::recommend::recommend;
//! use refresco_engine::outcome::record_beverage_rating;
//!
//! // Initialize once
//! let data_dir = refresco_engine::config::data_dir();
//! let engine = Engine::open(&data_dir, EngineConfig::load(&data_dir)?)?;
//!
//! // Recommend
//! let rec = recommend(&engine, &responses, &catalog);
//!
//! // Record the user's rating (retrains when enough new samples arrive)
//! let outcome = record_beverage_rating(&engine, &responses, &catalog[0], 4.0).await?;
//!
//! // On shutdown
//! engine.save()?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! answers ──► features ──► predictor / segmenter / presentation
//!    │                              │
//!    ├──► user_type                 ▼
//!    └──► cascade            engine (snapshots, corpus, persistence)
//!                                   │
//!                     recommend / outcome / explain
//! ```

pub mod answers;
pub mod cascade;
pub mod config;
pub mod db;
pub mod engine;
pub mod explain;
pub mod features;
pub mod ledger;
pub mod models;
pub mod outcome;
pub mod persistence;
pub mod predictor;
pub mod presentation;
pub mod recommend;
pub mod segmenter;
pub mod synthetic;
pub mod types;
pub mod user_type;

// Core types
pub use config::EngineConfig;
pub use engine::{Engine, ModelSnapshot};
pub use types::*;

// Parsing and rules
pub use answers::{Profile, Signal};
pub use cascade::{should_show_alternatives, CascadeDecision};
pub use ledger::{PreferenceLedger, SizePreferenceAnalysis};

// Rating outcomes (the learning loop)
pub use outcome::{record_beverage_rating, record_presentation_rating, RatingOutcome};

// Recommendation assembly
pub use recommend::{recommend, Audience, Recommendation};
