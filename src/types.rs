//! Core types for the refresco personalization engine
//!
//! Catalog records accept both the English field names and the Spanish
//! names used by the beverage catalog. Enumerated catalog strings never fail
//! to parse: unknown values fall back to a documented default.

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

/// Clamp a rating into [1, 5]; non-finite input becomes the neutral 3.0
pub fn clamp_rating(rating: f64) -> f64 {
    if rating.is_finite() {
        rating.clamp(1.0, 5.0)
    } else {
        3.0
    }
}

// ============================================================================
// Catalog enums
// ============================================================================

/// Beverage category (unknown strings parse as `Cola`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BeverageCategory {
    #[default]
    Cola,
    Citrus,
    Fruit,
    Energy,
    Water,
    Juice,
    Tea,
}

impl BeverageCategory {
    pub fn index(&self) -> usize {
        match self {
            Self::Cola => 0,
            Self::Citrus => 1,
            Self::Fruit => 2,
            Self::Energy => 3,
            Self::Water => 4,
            Self::Juice => 5,
            Self::Tea => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cola => "cola",
            Self::Citrus => "citricos",
            Self::Fruit => "frutales",
            Self::Energy => "energeticas",
            Self::Water => "agua",
            Self::Juice => "jugos",
            Self::Tea => "tes",
        }
    }
}

impl From<String> for BeverageCategory {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "citricos" | "citrus" => Self::Citrus,
            "frutales" | "fruit" => Self::Fruit,
            "energeticas" | "energy" => Self::Energy,
            "agua" | "water" => Self::Water,
            "jugos" | "juice" => Self::Juice,
            "tes" | "tea" => Self::Tea,
            _ => Self::Cola,
        }
    }
}

impl From<BeverageCategory> for String {
    fn from(c: BeverageCategory) -> Self {
        c.as_str().to_string()
    }
}

/// Flavor profile (unknown strings parse as `ClassicSweet`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FlavorProfile {
    #[default]
    ClassicSweet,
    IntenseSweet,
    CitrusRefreshing,
    EnergyFruit,
    TropicalFruit,
    PureNatural,
    NaturalCitrus,
    HerbalRefreshing,
}

impl FlavorProfile {
    pub fn index(&self) -> usize {
        match self {
            Self::ClassicSweet => 0,
            Self::IntenseSweet => 1,
            Self::CitrusRefreshing => 2,
            Self::EnergyFruit => 3,
            Self::TropicalFruit => 4,
            Self::PureNatural => 5,
            Self::NaturalCitrus => 6,
            Self::HerbalRefreshing => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassicSweet => "dulce_clasico",
            Self::IntenseSweet => "dulce_intenso",
            Self::CitrusRefreshing => "citrico_refrescante",
            Self::EnergyFruit => "energetico_frutal",
            Self::TropicalFruit => "frutal_tropical",
            Self::PureNatural => "natural_puro",
            Self::NaturalCitrus => "natural_citrico",
            Self::HerbalRefreshing => "herbal_refrescante",
        }
    }
}

impl From<String> for FlavorProfile {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "dulce_intenso" => Self::IntenseSweet,
            "citrico_refrescante" => Self::CitrusRefreshing,
            "energetico_frutal" => Self::EnergyFruit,
            "frutal_tropical" => Self::TropicalFruit,
            "natural_puro" => Self::PureNatural,
            "natural_citrico" => Self::NaturalCitrus,
            "herbal_refrescante" => Self::HerbalRefreshing,
            _ => Self::ClassicSweet,
        }
    }
}

impl From<FlavorProfile> for String {
    fn from(f: FlavorProfile) -> Self {
        f.as_str().to_string()
    }
}

/// Calorie bucket (unknown strings parse as `Medium`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CalorieLevel {
    Zero,
    VeryLow,
    Low,
    #[default]
    Medium,
    High,
}

impl CalorieLevel {
    pub fn index(&self) -> usize {
        match self {
            Self::Zero => 0,
            Self::VeryLow => 1,
            Self::Low => 2,
            Self::Medium => 3,
            Self::High => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "cero",
            Self::VeryLow => "muy_bajo",
            Self::Low => "bajo",
            Self::Medium => "medio",
            Self::High => "alto",
        }
    }

    /// Zero or very-low calorie
    pub fn is_light(&self) -> bool {
        matches!(self, Self::Zero | Self::VeryLow)
    }
}

impl From<String> for CalorieLevel {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "cero" | "zero" => Self::Zero,
            "muy_bajo" | "very_low" => Self::VeryLow,
            "bajo" | "low" => Self::Low,
            "alto" | "high" => Self::High,
            _ => Self::Medium,
        }
    }
}

impl From<CalorieLevel> for String {
    fn from(c: CalorieLevel) -> Self {
        c.as_str().to_string()
    }
}

// ============================================================================
// Presentations
// ============================================================================

/// Size bins by volume in ml
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    Mini,
    Individual,
    Personal,
    Familiar,
    Bulk,
    Special,
}

impl SizeCategory {
    /// The five bounded bins, in one-hot order
    pub const BINNED: [SizeCategory; 5] = [
        Self::Mini,
        Self::Individual,
        Self::Personal,
        Self::Familiar,
        Self::Bulk,
    ];

    pub fn from_volume(ml: u32) -> Self {
        match ml {
            0..=250 => Self::Mini,
            251..=400 => Self::Individual,
            401..=750 => Self::Personal,
            751..=3000 => Self::Familiar,
            3001..=10000 => Self::Bulk,
            _ => Self::Special,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mini => "mini",
            Self::Individual => "individual",
            Self::Personal => "personal",
            Self::Familiar => "familiar",
            Self::Bulk => "bulk",
            Self::Special => "especial",
        }
    }

    /// Static (convenience, portability, price-per-unit, waste-concern) factors
    pub fn preference_factors(&self) -> [f64; 4] {
        match self {
            Self::Mini => [1.0, 1.0, 0.3, 0.8],
            Self::Individual => [0.9, 0.8, 0.6, 0.9],
            Self::Personal => [0.7, 0.6, 0.8, 0.7],
            Self::Familiar => [0.5, 0.3, 1.0, 0.6],
            Self::Bulk | Self::Special => [0.5; 4],
        }
    }
}

/// Rolling rating statistics for one presentation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingStats {
    pub count: u32,
    pub mean: f64,
    /// Counts of 1..=5 star ratings (fractional ratings round to the nearest star)
    pub histogram: [u32; 5],
}

impl RatingStats {
    pub fn record(&mut self, rating: f64) {
        let rating = clamp_rating(rating);
        self.count += 1;
        self.mean += (rating - self.mean) / self.count as f64;
        let star = rating.round() as usize;
        self.histogram[star.clamp(1, 5) - 1] += 1;
    }
}

/// Catalogs written by spreadsheets emit volumes as floats
fn deserialize_volume<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Volume {
        Whole(u32),
        Float(f64),
    }

    match Volume::deserialize(deserializer)? {
        Volume::Whole(ml) => Ok(ml),
        Volume::Float(ml) if ml.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&ml) => {
            Ok(ml as u32)
        }
        Volume::Float(ml) => Err(de::Error::custom(format!(
            "volume must be a whole number of ml, got {}",
            ml
        ))),
    }
}

/// A purchasable size/price variant of a beverage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresentationRecord {
    #[serde(default, alias = "presentation_id")]
    pub id: Option<String>,
    /// Whole milliliters; `355` and `355.0` both parse
    #[serde(default, alias = "ml", deserialize_with = "deserialize_volume")]
    pub volume_ml: u32,
    #[serde(default, alias = "precio")]
    pub price: f64,
    #[serde(default, alias = "sabor")]
    pub flavor: Option<String>,
    #[serde(default)]
    pub stats: RatingStats,
}

impl PresentationRecord {
    pub fn new(volume_ml: u32, price: f64) -> Self {
        Self {
            volume_ml,
            price,
            ..Default::default()
        }
    }

    /// Explicit id, or `"{beverage_id}_{volume}"`
    pub fn id_for(&self, beverage_id: &str) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}_{}", beverage_id, self.volume_ml))
    }

    pub fn size_category(&self) -> SizeCategory {
        SizeCategory::from_volume(self.volume_ml)
    }

    pub fn price_per_ml(&self) -> f64 {
        self.price / f64::from(self.volume_ml.max(1))
    }
}

// ============================================================================
// Beverages
// ============================================================================

fn default_sweetness() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}

fn default_price() -> f64 {
    25.0
}

/// A catalog beverage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeverageRecord {
    pub id: String,
    #[serde(default, alias = "nombre")]
    pub name: String,
    #[serde(default, alias = "categoria")]
    pub category: BeverageCategory,
    #[serde(default, alias = "perfil_sabor")]
    pub flavor: FlavorProfile,
    /// 0-10
    #[serde(default = "default_sweetness", alias = "nivel_dulzura")]
    pub sweetness: f64,
    #[serde(default, alias = "contenido_calorias")]
    pub calories: CalorieLevel,
    #[serde(default = "default_true", alias = "es_refresco_real")]
    pub is_real_soda: bool,
    #[serde(default, alias = "es_energizante")]
    pub is_energizing: bool,
    #[serde(default = "default_price", alias = "precio_base")]
    pub base_price: f64,
    #[serde(default, alias = "categorias_ml")]
    pub ml_categories: Vec<String>,
    #[serde(default, alias = "tags_automaticos")]
    pub tags: Vec<String>,
    #[serde(default, alias = "presentaciones")]
    pub presentations: Vec<PresentationRecord>,
}

impl BeverageRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: BeverageCategory::default(),
            flavor: FlavorProfile::default(),
            sweetness: default_sweetness(),
            calories: CalorieLevel::default(),
            is_real_soda: true,
            is_energizing: false,
            base_price: default_price(),
            ml_categories: Vec::new(),
            tags: Vec::new(),
            presentations: Vec::new(),
        }
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.ml_categories.iter().any(|c| c == name)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t == name)
    }
}

// ============================================================================
// Questionnaire answers
// ============================================================================

/// One questionnaire answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(alias = "question", alias = "categoria")]
    pub category: String,
    #[serde(alias = "answer", alias = "respuesta")]
    pub value: String,
    /// 1-based position of the chosen option, when the client reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u8>,
    /// Seconds taken to answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
}

impl Answer {
    pub fn new(category: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

/// Accepted wire shapes: `{session_id, answers: [...]}` or a flat
/// `{category: value}` map (with an optional `session_id` key).
/// Flat maps keep document order; position patterns depend on it.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawResponses {
    Structured {
        #[serde(default)]
        session_id: Option<String>,
        answers: Vec<Answer>,
    },
    Flat(serde_json::Map<String, serde_json::Value>),
}

impl From<RawResponses> for UserResponseSet {
    fn from(raw: RawResponses) -> Self {
        match raw {
            RawResponses::Structured {
                session_id,
                answers,
            } => Self {
                session_id,
                answers,
            },
            RawResponses::Flat(map) => {
                let mut session_id = None;
                let mut answers = Vec::new();
                for (key, value) in map {
                    let text = match value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => continue,
                        other => other.to_string(),
                    };
                    if key == "session_id" {
                        session_id = Some(text);
                    } else {
                        answers.push(Answer::new(key, text));
                    }
                }
                Self {
                    session_id,
                    answers,
                }
            }
        }
    }
}

/// A user's questionnaire answers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawResponses")]
pub struct UserResponseSet {
    #[serde(default)]
    pub session_id: Option<String>,
    pub answers: Vec<Answer>,
}

impl UserResponseSet {
    pub fn new(session_id: Option<String>, answers: Vec<Answer>) -> Self {
        Self {
            session_id,
            answers,
        }
    }

    /// Build from `(category, value)` pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            session_id: None,
            answers: pairs.into_iter().map(|(k, v)| Answer::new(k, v)).collect(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn response_times(&self) -> Vec<f64> {
        self.answers.iter().filter_map(|a| a.response_time).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

/// Behavioral classification of a respondent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Regular,
    NonConsumer,
    TestUser,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::NonConsumer => "non_consumer",
            Self::TestUser => "test_user",
        }
    }
}

// ============================================================================
// Training corpora
// ============================================================================

/// One (user, beverage) -> rating observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: Vec<f64>,
    /// Encoder that produced `features`
    #[serde(default)]
    pub encoder_version: u32,
    pub rating: f64,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub beverage_id: String,
}

/// One rating of a specific presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationRatingRecord {
    pub presentation_id: String,
    pub session_id: Option<String>,
    pub beverage_id: String,
    pub volume_ml: u32,
    pub price: f64,
    pub rating: f64,
    pub features: Vec<f64>,
    #[serde(default)]
    pub encoder_version: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl PresentationRatingRecord {
    pub fn price_per_ml(&self) -> f64 {
        self.price / f64::from(self.volume_ml.max(1))
    }
}

/// Score for one presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationPrediction {
    pub predicted_rating: f64,
    pub price_preference_score: f64,
    pub size_preference_score: f64,
    pub cluster_id: usize,
    pub confidence: f64,
}

/// A presentation ranked for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPresentation {
    pub beverage_id: String,
    pub beverage_name: String,
    pub presentation_id: String,
    pub presentation: PresentationRecord,
    pub prediction: PresentationPrediction,
    /// predicted_rating * confidence
    pub combined_score: f64,
}

// ============================================================================
// Stats
// ============================================================================

/// Preference model status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub is_trained: bool,
    pub training_samples: usize,
    pub segmenter_trained: bool,
    pub model_version: u32,
    pub encoder_version: u32,
    pub last_training: Option<DateTime<Utc>>,
    pub samples_since_training: usize,
}

/// Presentation subsystem status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub is_trained: bool,
    pub total_ratings: usize,
    pub unique_presentations: usize,
    pub unique_users: usize,
    pub model_version: u32,
    pub last_training: Option<DateTime<Utc>>,
    pub size_categories: Vec<SizeCategory>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_rating() {
        assert_eq!(clamp_rating(0.0), 1.0);
        assert_eq!(clamp_rating(7.5), 5.0);
        assert_eq!(clamp_rating(3.3), 3.3);
        assert_eq!(clamp_rating(f64::NAN), 3.0);
    }

    #[test]
    fn test_size_bins() {
        assert_eq!(SizeCategory::from_volume(0), SizeCategory::Mini);
        assert_eq!(SizeCategory::from_volume(250), SizeCategory::Mini);
        assert_eq!(SizeCategory::from_volume(251), SizeCategory::Individual);
        assert_eq!(SizeCategory::from_volume(600), SizeCategory::Personal);
        assert_eq!(SizeCategory::from_volume(2000), SizeCategory::Familiar);
        assert_eq!(SizeCategory::from_volume(10000), SizeCategory::Bulk);
        assert_eq!(SizeCategory::from_volume(10001), SizeCategory::Special);
    }

    #[test]
    fn test_unknown_enum_strings_fall_back() {
        let json = r#"{"id":"x","categoria":"plasma","perfil_sabor":"???","contenido_calorias":"mucho"}"#;
        let b: BeverageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(b.category, BeverageCategory::Cola);
        assert_eq!(b.flavor, FlavorProfile::ClassicSweet);
        assert_eq!(b.calories, CalorieLevel::Medium);
        assert_eq!(b.sweetness, 5.0);
        assert!(b.is_real_soda);
        assert_eq!(b.base_price, 25.0);
    }

    #[test]
    fn test_spanish_catalog_fields() {
        let json = r#"{
            "id": "agua1", "nombre": "Agua", "categoria": "agua",
            "es_refresco_real": false, "contenido_calorias": "cero",
            "presentaciones": [{"ml": 600, "precio": 12.0}]
        }"#;
        let b: BeverageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(b.category, BeverageCategory::Water);
        assert!(!b.is_real_soda);
        assert_eq!(b.presentations[0].volume_ml, 600);
        assert_eq!(b.presentations[0].id_for(&b.id), "agua1_600");
        assert_eq!(b.presentations[0].size_category(), SizeCategory::Personal);
    }

    #[test]
    fn test_flat_responses_parse() {
        let r: UserResponseSet =
            serde_json::from_str(r#"{"consumo_base":"nunca","session_id":"s1"}"#).unwrap();
        assert_eq!(r.session_id.as_deref(), Some("s1"));
        assert_eq!(r.answers, vec![Answer::new("consumo_base", "nunca")]);
    }

    #[test]
    fn test_flat_responses_keep_document_order() {
        let json = r#"{"sabor":"primera","tamano":"segunda","precio":"tercera","marca":"cuarta"}"#;
        let r: UserResponseSet = serde_json::from_str(json).unwrap();
        let order: Vec<&str> = r.answers.iter().map(|a| a.category.as_str()).collect();
        assert_eq!(order, vec!["sabor", "tamano", "precio", "marca"]);
        assert_eq!(
            crate::user_type::classify(&r, &r.response_times()),
            UserType::TestUser
        );
    }

    #[test]
    fn test_volume_accepts_whole_floats() {
        let p: PresentationRecord = serde_json::from_str(r#"{"ml": 355.0, "precio": 15.5}"#).unwrap();
        assert_eq!(p.volume_ml, 355);
        let p: PresentationRecord = serde_json::from_str(r#"{"ml": 600}"#).unwrap();
        assert_eq!(p.volume_ml, 600);
        assert!(serde_json::from_str::<PresentationRecord>(r#"{"ml": 355.5}"#).is_err());
        assert_eq!(PresentationRecord::default().volume_ml, 0);
    }

    #[test]
    fn test_structured_responses_parse() {
        let json = r#"{"session_id":"s2","answers":[
            {"category":"fisico","value":"activo","position":4,"response_time":5.2}
        ]}"#;
        let r: UserResponseSet = serde_json::from_str(json).unwrap();
        assert_eq!(r.answers[0].position, Some(4));
        assert_eq!(r.response_times(), vec![5.2]);
    }

    #[test]
    fn test_rating_stats_rolling_mean() {
        let mut stats = RatingStats::default();
        for r in [5.0, 3.0, 4.0, 9.0] {
            stats.record(r);
        }
        assert_eq!(stats.count, 4);
        assert!((stats.mean - 4.25).abs() < 1e-12);
        assert_eq!(stats.histogram, [0, 0, 1, 1, 2]);
    }
}
