//! The personalization engine service object
//!
//! Initialize once at start-up and hand clones to every caller:
//!
//! ```rust,ignore
//! let engine = Engine::open(&data_dir, EngineConfig::load(&data_dir)?)?;
//! let score = engine.predict_preference(&responses, &beverage);
//! engine.add_training_data(&responses, &beverage, 4.0)?;
//! engine.retrain_if_needed(false);
//! engine.save()?;
//! ```
//!
//! Concurrency:
//! - Reads clone an `Arc<ModelSnapshot>` and never see a half-trained model
//! - Writes to the corpus are serialized by one mutex (corpus + SQLite)
//! - Training fits on a copy of the corpus outside that mutex, then swaps
//!   the snapshot; one training run per model family at a time

use crate::answers::{response_seed, Profile};
use crate::cascade;
use crate::config::EngineConfig;
use crate::db;
use crate::features::{encode_preference_profile, encode_presentation, ENCODER_VERSION, USER_DIM};
use crate::ledger::{PreferenceLedger, SizePreferenceAnalysis};
use crate::models::ModelError;
use crate::persistence::{self, Loaded};
use crate::predictor::PreferencePredictor;
use crate::presentation::{rank_presentations, PresentationScorer};
use crate::segmenter::UserSegmenter;
use crate::types::{
    clamp_rating, BeverageRecord, ModelStats, PresentationPrediction, PresentationRatingRecord,
    PresentationRecord, RankedPresentation, SizeCategory, SystemStats, TrainingSample, UserResponseSet,
    UserType,
};
use crate::user_type;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const PREFERENCE_FAMILY: &str = "preference";
pub const PRESENTATION_FAMILY: &str = "presentation";

// ============================================================================
// Snapshots
// ============================================================================

/// Preference predictor + user segmenter, fitted together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceState {
    pub predictor: PreferencePredictor,
    pub segmenter: UserSegmenter,
    pub model_version: u32,
    pub last_training: Option<DateTime<Utc>>,
    /// Corpus size the models were fitted on
    pub trained_on: usize,
}

impl PreferenceState {
    fn new(seed: u64) -> Self {
        Self {
            predictor: PreferencePredictor::new(seed),
            segmenter: UserSegmenter::new(seed),
            model_version: 0,
            last_training: None,
            trained_on: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationState {
    pub scorer: PresentationScorer,
    pub model_version: u32,
    pub last_training: Option<DateTime<Utc>>,
}

impl PresentationState {
    fn new(seed: u64) -> Self {
        Self {
            scorer: PresentationScorer::new(seed),
            model_version: 0,
            last_training: None,
        }
    }
}

/// Everything inference reads; replaced wholesale, never mutated
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub preference: Arc<PreferenceState>,
    pub presentation: Arc<PresentationState>,
}

/// Corpus and its backing store; only touched under the writer mutex
struct Corpus {
    conn: Connection,
    samples: Vec<TrainingSample>,
    ratings: Vec<PresentationRatingRecord>,
}

struct Inner {
    config: EngineConfig,
    model_dir: Option<PathBuf>,
    snapshot: RwLock<Arc<ModelSnapshot>>,
    corpus: Mutex<Corpus>,
    ledger: RwLock<PreferenceLedger>,
    sample_count: AtomicUsize,
    rating_count: AtomicUsize,
    training_preference: AtomicBool,
    training_presentation: AtomicBool,
}

/// Cheap to clone; all clones share the same models and corpus
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

/// Holds a family's training flag for the duration of a run
struct TrainingGuard<'a>(&'a AtomicBool);

impl<'a> TrainingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Engine {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Open `data_dir/corpus.db`, load the corpus and any saved models
    pub fn open(data_dir: &Path, config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {:?}", data_dir))?;
        let conn = db::init_db(&data_dir.join("corpus.db"))?;
        let engine = Self::from_conn(conn, config, Some(data_dir.join("models")))?;
        engine.load();
        Ok(engine)
    }

    /// In-memory corpus, no model directory
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Self::from_conn(db::init_memory_db()?, config, None)
    }

    fn from_conn(conn: Connection, config: EngineConfig, model_dir: Option<PathBuf>) -> Result<Self> {
        let samples = db::load_training_samples(&conn)?;
        let ratings = db::load_presentation_ratings(&conn)?;
        info!(
            samples = samples.len(),
            ratings = ratings.len(),
            "Training corpus loaded"
        );

        let ledger = replay_ledger(&ratings);
        let snapshot = ModelSnapshot {
            preference: Arc::new(PreferenceState::new(config.seed)),
            presentation: Arc::new(PresentationState::new(config.seed)),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                sample_count: AtomicUsize::new(samples.len()),
                rating_count: AtomicUsize::new(ratings.len()),
                config,
                model_dir,
                snapshot: RwLock::new(Arc::new(snapshot)),
                corpus: Mutex::new(Corpus {
                    conn,
                    samples,
                    ratings,
                }),
                ledger: RwLock::new(ledger),
                training_preference: AtomicBool::new(false),
                training_presentation: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Current models; cheap, lock held only for the pointer clone
    pub fn snapshot(&self) -> Arc<ModelSnapshot> {
        self.inner.snapshot.read().clone()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Append a (user, beverage, rating) sample; returns the corpus size
    pub fn add_training_data(
        &self,
        responses: &UserResponseSet,
        beverage: &BeverageRecord,
        rating: f64,
    ) -> Result<usize> {
        let profile = Profile::parse(responses);
        let sample = TrainingSample {
            features: encode_preference_profile(&profile, beverage),
            encoder_version: ENCODER_VERSION,
            rating: clamp_rating(rating),
            timestamp: Utc::now(),
            session_id: responses.session_id.clone(),
            beverage_id: beverage.id.clone(),
        };

        let mut corpus = self.inner.corpus.lock();
        db::insert_training_sample(&corpus.conn, &sample)?;
        corpus.samples.push(sample);
        let total = corpus.samples.len();
        self.inner.sample_count.store(total, Ordering::Release);
        debug!(beverage = %beverage.id, total, "Training sample added");
        Ok(total)
    }

    /// Append a presentation rating and update the online ledger
    pub fn add_presentation_rating(
        &self,
        presentation_id: &str,
        responses: &UserResponseSet,
        beverage: &BeverageRecord,
        presentation: &PresentationRecord,
        rating: f64,
        context: serde_json::Value,
    ) -> Result<usize> {
        let profile = Profile::parse(responses);
        let now = Utc::now();
        let record = PresentationRatingRecord {
            presentation_id: presentation_id.to_string(),
            session_id: responses.session_id.clone(),
            beverage_id: beverage.id.clone(),
            volume_ml: presentation.volume_ml,
            price: presentation.price,
            rating: clamp_rating(rating),
            features: encode_presentation(presentation, Some(beverage), Some(&profile)),
            encoder_version: ENCODER_VERSION,
            timestamp: now,
            context,
        };

        let mut corpus = self.inner.corpus.lock();
        db::insert_presentation_rating(&corpus.conn, &record)?;
        self.inner.ledger.write().record(
            record.session_id.as_deref(),
            &record.presentation_id,
            presentation.size_category(),
            record.price_per_ml(),
            record.rating,
            now,
        );
        corpus.ratings.push(record);
        let total = corpus.ratings.len();
        self.inner.rating_count.store(total, Ordering::Release);
        debug!(presentation = presentation_id, total, "Presentation rating added");
        Ok(total)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn classify_user(&self, responses: &UserResponseSet) -> UserType {
        user_type::classify(responses, &responses.response_times())
    }

    /// Predicted rating in [1, 5]
    pub fn predict_preference(&self, responses: &UserResponseSet, beverage: &BeverageRecord) -> f64 {
        let snapshot = self.snapshot();
        let profile = Profile::parse(responses);
        let kind = self.classify_user(responses);
        let mut rng = exploration_rng(responses, beverage);
        snapshot
            .preference
            .predictor
            .predict(&profile, kind, beverage, &mut rng)
    }

    /// User segment in [0, 4]
    pub fn get_user_cluster(&self, responses: &UserResponseSet) -> usize {
        self.snapshot()
            .preference
            .segmenter
            .cluster(&Profile::parse(responses))
    }

    pub fn predict_presentation_rating(
        &self,
        responses: &UserResponseSet,
        beverage: &BeverageRecord,
        presentation: &PresentationRecord,
    ) -> PresentationPrediction {
        let snapshot = self.snapshot();
        let profile = Profile::parse(responses);
        let ledger = self.inner.ledger.read();
        snapshot.presentation.scorer.predict(
            presentation,
            beverage,
            &profile,
            responses.session_id.as_deref(),
            &ledger,
            self.inner.rating_count.load(Ordering::Acquire),
        )
    }

    /// Best `top_n` presentations across the catalog, by rating * confidence
    pub fn get_best_presentations_for_user(
        &self,
        responses: &UserResponseSet,
        beverages: &[BeverageRecord],
        top_n: usize,
    ) -> Vec<RankedPresentation> {
        let snapshot = self.snapshot();
        let profile = Profile::parse(responses);
        let ledger = self.inner.ledger.read();
        rank_presentations(
            &snapshot.presentation.scorer,
            beverages,
            &profile,
            responses.session_id.as_deref(),
            &ledger,
            self.inner.rating_count.load(Ordering::Acquire),
            top_n,
        )
    }

    pub fn should_show_alternatives(&self, responses: &UserResponseSet) -> bool {
        cascade::should_show_alternatives(responses)
    }

    pub fn analyze_user_size_preferences(&self, session_id: &str) -> SizePreferenceAnalysis {
        self.inner.ledger.read().analyze(session_id)
    }

    pub fn get_model_stats(&self) -> ModelStats {
        let state = self.snapshot().preference.clone();
        let samples = self.inner.sample_count.load(Ordering::Acquire);
        ModelStats {
            is_trained: state.predictor.is_trained(),
            training_samples: samples,
            segmenter_trained: state.segmenter.is_trained(),
            model_version: state.model_version,
            encoder_version: ENCODER_VERSION,
            last_training: state.last_training,
            samples_since_training: samples.saturating_sub(state.trained_on),
        }
    }

    pub fn get_system_stats(&self) -> SystemStats {
        let state = self.snapshot().presentation.clone();
        let ledger = self.inner.ledger.read();
        SystemStats {
            is_trained: state.scorer.is_trained(),
            total_ratings: self.inner.rating_count.load(Ordering::Acquire),
            unique_presentations: ledger.presentation_count(),
            unique_users: ledger.session_count(),
            model_version: state.model_version,
            last_training: state.last_training,
            size_categories: SizeCategory::BINNED.to_vec(),
        }
    }

    // ========================================================================
    // Training
    // ========================================================================

    /// Fit the preference predictor and segmenter; false if skipped
    ///
    /// Returns false immediately when another preference run is in flight.
    pub fn train(&self) -> bool {
        let Some(_guard) = TrainingGuard::acquire(&self.inner.training_preference) else {
            info!("Preference training already running, skipping");
            return false;
        };

        let (samples, corpus_size) = {
            let corpus = self.inner.corpus.lock();
            (
                current_encoding(&corpus.samples, |s| s.encoder_version),
                corpus.samples.len(),
            )
        };
        let seed = self.inner.config.seed;
        let rows: Vec<Vec<f64>> = samples.iter().map(|s| s.features.clone()).collect();
        let ratings: Vec<f64> = samples.iter().map(|s| s.rating).collect();

        let mut predictor = PreferencePredictor::new(seed);
        let report = match predictor.fit(&rows, &ratings, self.inner.config.min_training_samples) {
            Ok(report) => report,
            Err(ModelError::InsufficientData { needed, got }) => {
                info!(needed, got, "Not enough samples to train preference model");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Preference training failed");
                return false;
            }
        };

        let user_rows: Vec<Vec<f64>> = rows
            .iter()
            .filter(|r| r.len() >= USER_DIM)
            .map(|r| r[..USER_DIM].to_vec())
            .collect();
        let distinct_users = samples
            .iter()
            .filter_map(|s| s.session_id.as_deref())
            .collect::<HashSet<_>>()
            .len();
        let mut segmenter = UserSegmenter::new(seed);
        if let Err(e) = segmenter.fit(&user_rows, distinct_users) {
            warn!(error = %e, "Segmenter training failed, keeping heuristic clusters");
            segmenter = UserSegmenter::new(seed);
        }

        let state = {
            let mut slot = self.inner.snapshot.write();
            let state = Arc::new(PreferenceState {
                predictor,
                segmenter,
                model_version: slot.preference.model_version + 1,
                last_training: Some(Utc::now()),
                trained_on: corpus_size,
            });
            *slot = Arc::new(ModelSnapshot {
                preference: state.clone(),
                presentation: slot.presentation.clone(),
            });
            state
        };
        info!(
            samples = report.samples,
            mse = ?report.holdout_mse,
            version = state.model_version,
            "Preference models swapped in"
        );

        if let Err(e) = self.save_preference(&state) {
            error!(error = %e, "Failed to save preference models");
        }
        true
    }

    /// Fit every presentation model; false if skipped
    pub fn train_presentations(&self) -> bool {
        let Some(_guard) = TrainingGuard::acquire(&self.inner.training_presentation) else {
            info!("Presentation training already running, skipping");
            return false;
        };

        let ratings = current_encoding(&self.inner.corpus.lock().ratings, |r| r.encoder_version);
        let mut scorer = PresentationScorer::new(self.inner.config.seed);
        let report = match scorer.fit(&ratings, self.inner.config.presentation_min_samples) {
            Ok(report) => report,
            Err(ModelError::InsufficientData { needed, got }) => {
                info!(needed, got, "Not enough ratings to train presentation models");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Presentation training failed");
                return false;
            }
        };

        let state = {
            let mut slot = self.inner.snapshot.write();
            let state = Arc::new(PresentationState {
                scorer,
                model_version: slot.presentation.model_version + 1,
                last_training: Some(Utc::now()),
            });
            *slot = Arc::new(ModelSnapshot {
                preference: slot.preference.clone(),
                presentation: state.clone(),
            });
            state
        };
        info!(
            samples = report.samples,
            mse = ?report.holdout_mse,
            r2 = ?report.holdout_r2,
            clustered = report.clustered,
            version = state.model_version,
            "Presentation models swapped in"
        );

        if let Err(e) = self.save_presentation(&state) {
            error!(error = %e, "Failed to save presentation models");
        }
        true
    }

    /// Train the preference models when enough new samples have arrived
    ///
    /// Untrained models train as soon as the minimum corpus is reached;
    /// trained ones every `retrain_every` new samples. `force` skips both checks.
    pub fn retrain_if_needed(&self, force: bool) -> bool {
        if force {
            return self.train();
        }
        let stats = self.get_model_stats();
        let config = &self.inner.config;
        if stats.training_samples < config.min_training_samples {
            return false;
        }
        if !stats.is_trained || stats.samples_since_training >= config.retrain_every.max(1) {
            return self.train();
        }
        false
    }

    /// `train` on the blocking pool, bounded by `train_timeout_secs`
    pub async fn train_with_timeout(&self) -> bool {
        self.train_within(Duration::from_secs(self.inner.config.train_timeout_secs))
            .await
    }

    /// On timeout returns false; the fit keeps running and still swaps in
    pub async fn train_within(&self, limit: Duration) -> bool {
        let engine = self.clone();
        bounded(PREFERENCE_FAMILY, limit, move || engine.train()).await
    }

    /// `retrain_if_needed` on the blocking pool, bounded by `train_timeout_secs`
    pub async fn retrain_if_needed_with_timeout(&self, force: bool) -> bool {
        let engine = self.clone();
        let limit = Duration::from_secs(self.inner.config.train_timeout_secs);
        bounded(PREFERENCE_FAMILY, limit, move || engine.retrain_if_needed(force)).await
    }

    /// `train_presentations` on the blocking pool, bounded by `train_timeout_secs`
    pub async fn train_presentations_with_timeout(&self) -> bool {
        self.train_presentations_within(Duration::from_secs(self.inner.config.train_timeout_secs))
            .await
    }

    /// Same contract as `train_within`, for the presentation models
    pub async fn train_presentations_within(&self, limit: Duration) -> bool {
        let engine = self.clone();
        bounded(PRESENTATION_FAMILY, limit, move || engine.train_presentations()).await
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Save both model families; no-op without a model directory
    pub fn save(&self) -> Result<()> {
        let snapshot = self.snapshot();
        self.save_preference(&snapshot.preference)?;
        self.save_presentation(&snapshot.presentation)?;
        Ok(())
    }

    fn save_preference(&self, state: &PreferenceState) -> Result<()> {
        let Some(dir) = &self.inner.model_dir else {
            return Ok(());
        };
        let path = persistence::save_family(dir, PREFERENCE_FAMILY, state.model_version, state)?;
        debug!(path = %path.display(), "Preference models saved");
        Ok(())
    }

    fn save_presentation(&self, state: &PresentationState) -> Result<()> {
        let Some(dir) = &self.inner.model_dir else {
            return Ok(());
        };
        let path = persistence::save_family(dir, PRESENTATION_FAMILY, state.model_version, state)?;
        debug!(path = %path.display(), "Presentation models saved");
        Ok(())
    }

    /// Load saved families; errors are logged and defaults kept
    ///
    /// Returns how many families were restored.
    pub fn load(&self) -> usize {
        let Some(dir) = self.inner.model_dir.clone() else {
            return 0;
        };
        let mut loaded = 0;

        match persistence::load_family::<PreferenceState>(&dir, PREFERENCE_FAMILY) {
            Ok(Some(Loaded { payload, .. })) => {
                let mut slot = self.inner.snapshot.write();
                *slot = Arc::new(ModelSnapshot {
                    preference: Arc::new(payload),
                    presentation: slot.presentation.clone(),
                });
                loaded += 1;
            }
            Ok(None) => debug!("No saved preference models"),
            Err(e) => warn!(error = %e, "Could not load preference models, keeping defaults"),
        }

        // The ledger is always the replayed corpus, never a saved copy
        match persistence::load_family::<PresentationState>(&dir, PRESENTATION_FAMILY) {
            Ok(Some(Loaded { payload, .. })) => {
                let mut slot = self.inner.snapshot.write();
                *slot = Arc::new(ModelSnapshot {
                    preference: slot.preference.clone(),
                    presentation: Arc::new(payload),
                });
                loaded += 1;
            }
            Ok(None) => debug!("No saved presentation models"),
            Err(e) => warn!(error = %e, "Could not load presentation models, keeping defaults"),
        }

        if loaded > 0 {
            info!(families = loaded, dir = %dir.display(), "Models loaded");
        }
        loaded
    }
}

/// Run a blocking fit on the blocking pool, giving up on it after `limit`
async fn bounded<F>(family: &'static str, limit: Duration, fit: F) -> bool
where
    F: FnOnce() -> bool + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(fit);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(trained)) => trained,
        Ok(Err(e)) => {
            error!(family, error = %e, "Training task failed");
            false
        }
        Err(_) => {
            warn!(
                family,
                limit_ms = limit.as_millis() as u64,
                "Training timed out, finishing in background"
            );
            false
        }
    }
}

/// Rows written by the current encoder; older widths cannot feed the models
fn current_encoding<T: Clone>(rows: &[T], version: impl Fn(&T) -> u32) -> Vec<T> {
    let current: Vec<T> = rows
        .iter()
        .filter(|r| version(r) == ENCODER_VERSION)
        .cloned()
        .collect();
    let stale = rows.len() - current.len();
    if stale > 0 {
        warn!(
            stale,
            encoder_version = ENCODER_VERSION,
            "Skipping rows encoded by another encoder version"
        );
    }
    current
}

/// Rebuild the online ledger from the stored ratings
fn replay_ledger(ratings: &[PresentationRatingRecord]) -> PreferenceLedger {
    let mut ledger = PreferenceLedger::new();
    for r in ratings {
        ledger.record(
            r.session_id.as_deref(),
            &r.presentation_id,
            SizeCategory::from_volume(r.volume_ml),
            r.price_per_ml(),
            r.rating,
            r.timestamp,
        );
    }
    ledger
}

/// Deterministic per (answers, beverage) exploration stream
fn exploration_rng(responses: &UserResponseSet, beverage: &BeverageRecord) -> StdRng {
    let mut hasher = Sha256::new();
    hasher.update(response_seed(responses).to_le_bytes());
    hasher.update(beverage.id.as_bytes());
    let digest = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    StdRng::seed_from_u64(u64::from_le_bytes(seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{self, SyntheticConfig};
    use crate::types::CalorieLevel;
    use serde_json::json;
    use tempfile::tempdir;

    fn small_config() -> EngineConfig {
        EngineConfig {
            min_training_samples: 10,
            presentation_min_samples: 20,
            ..EngineConfig::default()
        }
    }

    fn seeded(engine: &Engine, respondents: usize) {
        let config = SyntheticConfig {
            respondents,
            ..SyntheticConfig::default()
        };
        let data = synthetic::generate(&config);
        synthetic::feed(engine, &data).unwrap();
    }

    #[test]
    fn test_untrained_engine_uses_heuristics() {
        let engine = Engine::in_memory(small_config()).unwrap();
        let stats = engine.get_model_stats();
        assert!(!stats.is_trained);
        assert_eq!(stats.model_version, 0);
        assert!(!engine.get_system_stats().is_trained);

        let responses = UserResponseSet::from_pairs([("consumo_base", "nunca")]);
        let mut water = BeverageRecord::new("agua", "Agua");
        water.is_real_soda = false;
        water.calories = CalorieLevel::Zero;
        water.category = crate::types::BeverageCategory::Water;
        assert_eq!(engine.predict_preference(&responses, &water), 5.0);
    }

    #[test]
    fn test_untrained_presentation_confidence() {
        let engine = Engine::in_memory(small_config()).unwrap();
        let beverage = BeverageRecord::new("cola", "Cola");
        let p = PresentationRecord::new(600, 18.0);
        let prediction =
            engine.predict_presentation_rating(&UserResponseSet::default(), &beverage, &p);
        assert_eq!(prediction.confidence, 0.3);
    }

    #[test]
    fn test_train_needs_minimum_samples() {
        let engine = Engine::in_memory(small_config()).unwrap();
        let responses = UserResponseSet::from_pairs([("sabor", "muy_dulce")]);
        let beverage = BeverageRecord::new("cola", "Cola");
        for _ in 0..5 {
            engine.add_training_data(&responses, &beverage, 4.0).unwrap();
        }
        assert!(!engine.train());
        assert!(!engine.retrain_if_needed(false));
        assert!(!engine.get_model_stats().is_trained);
    }

    #[test]
    fn test_ratings_are_clamped_on_entry() {
        let engine = Engine::in_memory(small_config()).unwrap();
        let beverage = BeverageRecord::new("cola", "Cola");
        engine
            .add_training_data(&UserResponseSet::default(), &beverage, 9.0)
            .unwrap();
        let corpus = engine.inner.corpus.lock();
        assert_eq!(corpus.samples[0].rating, 5.0);
    }

    #[test]
    fn test_train_and_retrain_schedule() {
        let engine = Engine::in_memory(small_config()).unwrap();
        seeded(&engine, 8);
        assert!(engine.retrain_if_needed(false));

        let stats = engine.get_model_stats();
        assert!(stats.is_trained);
        assert_eq!(stats.model_version, 1);
        assert_eq!(stats.samples_since_training, 0);
        // Nothing new: no retrain
        assert!(!engine.retrain_if_needed(false));
        // Forced
        assert!(engine.retrain_if_needed(true));
        assert_eq!(engine.get_model_stats().model_version, 2);
    }

    #[test]
    fn test_concurrent_train_is_rejected() {
        let engine = Engine::in_memory(small_config()).unwrap();
        seeded(&engine, 8);
        let _held = TrainingGuard::acquire(&engine.inner.training_preference).unwrap();
        assert!(!engine.train());
    }

    #[test]
    fn test_predictions_stay_in_range_after_training() {
        let engine = Engine::in_memory(small_config()).unwrap();
        let data = synthetic::generate(&SyntheticConfig {
            respondents: 10,
            ..SyntheticConfig::default()
        });
        synthetic::feed(&engine, &data).unwrap();
        assert!(engine.train());
        assert!(engine.train_presentations());

        for r in &data.respondents {
            for b in &data.catalog {
                let score = engine.predict_preference(&r.responses, b);
                assert!((1.0..=5.0).contains(&score));
            }
            assert!(engine.get_user_cluster(&r.responses) < 5);
        }
        let ranked = engine.get_best_presentations_for_user(&data.respondents[0].responses, &data.catalog, 5);
        assert_eq!(ranked.len(), 5);
        assert!(ranked
            .windows(2)
            .all(|w| w[0].combined_score >= w[1].combined_score));
        assert!(ranked[0].prediction.confidence > 0.3);
    }

    #[test]
    fn test_test_user_offset_is_deterministic() {
        let engine = Engine::in_memory(small_config()).unwrap();
        let mut responses = UserResponseSet::from_pairs([("a", "x"), ("b", "y"), ("c", "z")]);
        for answer in &mut responses.answers {
            answer.position = Some(1);
            answer.response_time = Some(0.5);
        }
        assert_eq!(engine.classify_user(&responses), UserType::TestUser);

        let cola = BeverageRecord::new("cola", "Cola");
        let first = engine.predict_preference(&responses, &cola);
        let second = engine.predict_preference(&responses, &cola);
        assert_eq!(first, second);
        assert!((2.7..=4.3).contains(&first));
    }

    #[test]
    fn test_presentation_rating_updates_ledger_and_stats() {
        let engine = Engine::in_memory(small_config()).unwrap();
        let responses = UserResponseSet::from_pairs([("sabor", "dulce")]).with_session("s1");
        let beverage = BeverageRecord::new("cola", "Cola");
        let p = PresentationRecord::new(250, 25.0);

        engine
            .add_presentation_rating("cola_250", &responses, &beverage, &p, 5.0, json!({}))
            .unwrap();
        engine
            .add_presentation_rating("cola_250", &UserResponseSet::default(), &beverage, &p, 1.0, json!(null))
            .unwrap();

        let stats = engine.get_system_stats();
        assert_eq!(stats.total_ratings, 2);
        assert_eq!(stats.unique_presentations, 1);
        assert_eq!(stats.unique_users, 1);

        match engine.analyze_user_size_preferences("s1") {
            SizePreferenceAnalysis::Analyzed {
                price_sensitivity,
                total_ratings,
                ..
            } => {
                assert_eq!(price_sensitivity, -0.1);
                assert_eq!(total_ratings, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_save_load_gives_identical_predictions() {
        let dir = tempdir().unwrap();
        let data = synthetic::generate(&SyntheticConfig {
            respondents: 10,
            ..SyntheticConfig::default()
        });

        let before: Vec<f64>;
        let before_presentations: Vec<PresentationPrediction>;
        {
            let engine = Engine::open(dir.path(), small_config()).unwrap();
            synthetic::feed(&engine, &data).unwrap();
            assert!(engine.train());
            assert!(engine.train_presentations());
            engine.save().unwrap();

            before = data
                .catalog
                .iter()
                .map(|b| engine.predict_preference(&data.respondents[0].responses, b))
                .collect();
            before_presentations = data.catalog[0]
                .presentations
                .iter()
                .map(|p| engine.predict_presentation_rating(&data.respondents[1].responses, &data.catalog[0], p))
                .collect();
        }

        let reopened = Engine::open(dir.path(), small_config()).unwrap();
        assert!(reopened.get_model_stats().is_trained);
        assert!(reopened.get_system_stats().is_trained);
        let after: Vec<f64> = data
            .catalog
            .iter()
            .map(|b| reopened.predict_preference(&data.respondents[0].responses, b))
            .collect();
        let after_presentations: Vec<PresentationPrediction> = data.catalog[0]
            .presentations
            .iter()
            .map(|p| reopened.predict_presentation_rating(&data.respondents[1].responses, &data.catalog[0], p))
            .collect();

        assert_eq!(before, after);
        assert_eq!(before_presentations, after_presentations);
    }

    #[test]
    fn test_ratings_after_last_save_survive_restart() {
        let dir = tempdir().unwrap();
        let data = synthetic::generate(&SyntheticConfig {
            respondents: 30,
            ..SyntheticConfig::default()
        });
        let beverage = &data.catalog[0];
        let presentation = &beverage.presentations[0];
        let responses = UserResponseSet::from_pairs([("fisico", "activo")]).with_session("late_s2");

        let before = {
            let engine = Engine::open(dir.path(), small_config()).unwrap();
            synthetic::feed(&engine, &data).unwrap();
            assert!(engine.train_presentations());
            engine
                .add_presentation_rating(
                    &presentation.id_for(&beverage.id),
                    &responses,
                    beverage,
                    presentation,
                    5.0,
                    json!(null),
                )
                .unwrap();
            (engine.analyze_user_size_preferences("late_s2"), engine.get_system_stats())
        };
        assert!(matches!(before.0, SizePreferenceAnalysis::Analyzed { .. }));

        let reopened = Engine::open(dir.path(), small_config()).unwrap();
        assert_eq!(reopened.analyze_user_size_preferences("late_s2"), before.0);
        let stats = reopened.get_system_stats();
        assert!(stats.is_trained);
        assert_eq!(stats.total_ratings, before.1.total_ratings);
        assert_eq!(stats.unique_users, before.1.unique_users);
        assert_eq!(stats.unique_presentations, before.1.unique_presentations);
    }

    #[test]
    fn test_rows_from_other_encoders_are_not_trained_on() {
        let engine = Engine::in_memory(small_config()).unwrap();
        let beverage = BeverageRecord::new("cola", "Cola");
        {
            let mut corpus = engine.inner.corpus.lock();
            for i in 0..12 {
                let stale = TrainingSample {
                    features: vec![1.0, 2.0, 3.0],
                    encoder_version: 0,
                    rating: 4.0,
                    timestamp: Utc::now(),
                    session_id: Some(format!("old{}", i)),
                    beverage_id: "cola".to_string(),
                };
                db::insert_training_sample(&corpus.conn, &stale).unwrap();
                corpus.samples.push(stale);
            }
            engine.inner.sample_count.store(12, Ordering::Release);
        }
        // Only stale rows: nothing to fit
        assert!(!engine.train());

        let responses = UserResponseSet::from_pairs([("dulzura", "muy_dulce")]);
        for _ in 0..10 {
            engine.add_training_data(&responses, &beverage, 4.0).unwrap();
        }
        assert!(engine.train());
        let stats = engine.get_model_stats();
        assert!(stats.is_trained);
        assert_eq!(stats.samples_since_training, 0);
        assert!((1.0..=5.0).contains(&engine.predict_preference(&responses, &beverage)));
    }

    #[test]
    fn test_corrupt_model_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::write(dir.path().join("models").join("preference.json"), b"not json").unwrap();

        let engine = Engine::open(dir.path(), small_config()).unwrap();
        assert!(!engine.get_model_stats().is_trained);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_train_with_timeout_finishes_in_background() {
        let engine = Engine::in_memory(small_config()).unwrap();
        seeded(&engine, 60);

        let trained = engine.train_within(Duration::from_millis(1)).await;
        assert!(!trained);

        let mut waited = 0;
        while !engine.get_model_stats().is_trained && waited < 600 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            waited += 1;
        }
        assert!(engine.get_model_stats().is_trained);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_presentation_training_timeout_finishes_in_background() {
        let engine = Engine::in_memory(small_config()).unwrap();
        seeded(&engine, 60);

        assert!(!engine.train_presentations_within(Duration::from_millis(1)).await);

        let mut waited = 0;
        while !engine.get_system_stats().is_trained && waited < 600 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            waited += 1;
        }
        assert!(engine.get_system_stats().is_trained);
        assert_eq!(engine.get_system_stats().model_version, 1);
    }

    #[tokio::test]
    async fn test_bounded_presentation_training_completes() {
        let engine = Engine::in_memory(small_config()).unwrap();
        seeded(&engine, 10);
        assert!(engine.train_presentations_with_timeout().await);
        assert!(engine.retrain_if_needed_with_timeout(false).await);
    }

    #[tokio::test]
    async fn test_train_with_timeout_completes() {
        let engine = Engine::in_memory(small_config()).unwrap();
        seeded(&engine, 8);
        assert!(engine.train_with_timeout().await);
    }
}
