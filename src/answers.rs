//! Questionnaire answer parsing
//!
//! Raw answers are parsed once into a [`Profile`]:
//! - values are normalized (lowercase, accents stripped, spaces/hyphens to `_`)
//! - each value is tokenized greedily, longest token first, against a closed
//!   table of [`Signal`]s, so `poco_activo` reads as inactive and never active
//! - the seven ordinal categories are resolved through [`CATEGORY_MATCHERS`]

use crate::types::UserResponseSet;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// A closed vocabulary of facts an answer can assert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signal {
    // Activity
    VeryActive,
    Active,
    Sedentary,
    Inactive,
    // Sweetness
    VerySweet,
    Sweet,
    LightlySweet,
    Balanced,
    Natural,
    SugarFree,
    // Mood
    Stressful,
    Busy,
    Calm,
    Relaxed,
    // Time of day
    Morning,
    // Novelty
    Adventurous,
    Conservative,
    // Health importance (only when the answer is about health)
    HealthImportant,
    HealthVeryImportant,
    // Purchase context
    Family,
    Economical,
    Premium,
    // Decision cascade answers
    PriorityFlavor,
    PriorityHealth,
    OnlyNatural,
    NeverConsumes,
    LovesSodas,
    RejectsSodas,
    OnlyWater,
    NaturalDrinks,
    TraditionalSodas,
    AvoidsForHealth,
    ZeroNaturalSugar,
    DuringExercise,
    HealthFactor,
    NoHealthConcern,
    ActivityIntensity,
    SedentaryLifestyle,
    CaffeineRejection,
    CaffeineSeeking,
    CalmExperience,
    StimulatingExperience,
    PrefersAlternatives,
}

use Signal::*;

/// Longest tokens are at most this many `_`-separated words
const MAX_TOKEN_WORDS: usize = 3;

const TOKEN_TABLE: &[(&str, &[Signal])] = &[
    ("muy_activo", &[VeryActive, Active]),
    ("activo", &[Active]),
    ("activa", &[Active]),
    ("sedentario", &[Sedentary]),
    ("sedentaria", &[Sedentary]),
    ("inactivo", &[Inactive]),
    ("poco_activo", &[Inactive]),
    ("muy_dulce", &[VerySweet, Sweet]),
    ("dulce", &[Sweet]),
    ("dulce_moderado", &[Sweet]),
    ("poco_dulce", &[LightlySweet]),
    ("equilibrado", &[Balanced]),
    ("natural", &[Natural]),
    ("naturales", &[Natural]),
    ("sin_azucar", &[SugarFree]),
    ("cero_azucar", &[SugarFree]),
    ("estresante", &[Stressful]),
    ("estresado", &[Stressful]),
    ("ocupado", &[Busy]),
    ("tranquilo", &[Calm]),
    ("relajado", &[Relaxed]),
    ("manana", &[Morning]),
    ("media_manana", &[Morning]),
    ("aventurero", &[Adventurous]),
    ("muy_aventurero", &[Adventurous]),
    ("cosas_nuevas", &[Adventurous]),
    ("nuevas", &[Adventurous]),
    ("conservador", &[Conservative]),
    ("muy_conservador", &[Conservative]),
    ("importante", &[HealthImportant]),
    ("muy_importante", &[HealthVeryImportant, HealthImportant]),
    ("familiar", &[Family]),
    ("familia", &[Family]),
    ("compartir", &[Family]),
    ("economico", &[Economical]),
    ("barato", &[Economical]),
    ("premium", &[Premium]),
    ("prioridad_sabor", &[PriorityFlavor]),
    ("prioridad_salud", &[PriorityHealth]),
    ("solo_natural", &[OnlyNatural, Natural]),
    ("no_consume_refrescos", &[NeverConsumes]),
    ("ama_refrescos", &[LovesSodas]),
    ("rechaza_refrescos", &[RejectsSodas]),
    ("solo_agua", &[OnlyWater]),
    ("bebidas_naturales", &[NaturalDrinks, Natural]),
    ("refrescos_tradicionales", &[TraditionalSodas]),
    ("evita_salud", &[AvoidsForHealth]),
    ("cero_azucar_natural", &[ZeroNaturalSugar, SugarFree, Natural]),
    ("ejercicio_deporte", &[DuringExercise]),
    ("salud_azucar_calorias", &[HealthFactor]),
    ("salud_ingredientes_naturales", &[HealthFactor, Natural]),
    ("salud_sin_aditivos", &[HealthFactor]),
    ("salud_vitaminas_minerales", &[HealthFactor]),
    ("salud_no_importa", &[NoHealthConcern]),
    ("actividad_intensa", &[ActivityIntensity]),
    ("actividad_moderada", &[ActivityIntensity]),
    ("trabajo_sedentario", &[SedentaryLifestyle, Sedentary]),
    ("actividad_relajada", &[SedentaryLifestyle]),
    ("cafeina_evitar", &[CaffeineRejection]),
    ("cafeina_rechazo", &[CaffeineRejection]),
    ("cafeina_positiva", &[CaffeineSeeking]),
    ("experiencia_hidratacion", &[CalmExperience]),
    ("experiencia_relajacion", &[CalmExperience]),
    ("experiencia_placer", &[StimulatingExperience]),
    ("experiencia_energia", &[StimulatingExperience]),
    ("prefiere_alternativas", &[PrefersAlternatives]),
];

/// Ordinal question categories, in feature order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrdinalCategory {
    Consumption,
    Activity,
    Sweetness,
    Mood,
    TimeOfDay,
    Adventurousness,
    HealthImportance,
}

/// One ordinal category: key aliases and its 5-value domain (index = ordinal)
#[derive(Debug, Clone, Copy)]
pub struct CategoryMatcher {
    pub category: OrdinalCategory,
    pub aliases: &'static [&'static str],
    pub domain: [&'static str; 5],
}

pub const CATEGORY_MATCHERS: [CategoryMatcher; 7] = [
    CategoryMatcher {
        category: OrdinalCategory::Consumption,
        aliases: &["consumo_base", "frecuencia"],
        domain: ["nunca", "ocasional", "semanal", "frecuente", "diario"],
    },
    CategoryMatcher {
        category: OrdinalCategory::Activity,
        aliases: &["fisico", "actividad"],
        domain: ["inactivo", "sedentario", "moderado", "activo", "muy_activo"],
    },
    CategoryMatcher {
        category: OrdinalCategory::Sweetness,
        aliases: &["preferencias_dulzura", "dulzura"],
        domain: ["natural", "poco_dulce", "equilibrado", "dulce_moderado", "muy_dulce"],
    },
    CategoryMatcher {
        category: OrdinalCategory::Mood,
        aliases: &["estado_animo", "animo"],
        domain: ["tranquilo", "relajado", "equilibrado", "ocupado", "estresante"],
    },
    CategoryMatcher {
        category: OrdinalCategory::TimeOfDay,
        aliases: &["temporal", "momento"],
        domain: ["noche", "tarde", "almuerzo", "media_manana", "manana"],
    },
    CategoryMatcher {
        category: OrdinalCategory::Adventurousness,
        aliases: &["aventurero"],
        domain: [
            "muy_conservador",
            "conservador",
            "moderado",
            "aventurero",
            "muy_aventurero",
        ],
    },
    CategoryMatcher {
        category: OrdinalCategory::HealthImportance,
        aliases: &["salud_importancia"],
        domain: [
            "no_importa",
            "poco_importante",
            "moderado",
            "importante",
            "muy_importante",
        ],
    },
];

/// Normalize an answer key or value
///
/// `"Casi Nunca"` and `"casi-nunca"` both become `"casi_nunca"`; `"Mañana"` becomes `"manana"`.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars().flat_map(char::to_lowercase) {
        let mapped = match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            ' ' | '-' | '\t' => '_',
            other => other,
        };
        if mapped == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(mapped);
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn lookup(token: &str) -> Option<&'static [Signal]> {
    TOKEN_TABLE
        .iter()
        .find(|(t, _)| *t == token)
        .map(|(_, signals)| *signals)
}

/// Signals asserted by one normalized value (greedy, longest token first)
pub fn tokenize(normalized: &str) -> Vec<Signal> {
    let words: Vec<&str> = normalized.split('_').filter(|w| !w.is_empty()).collect();
    let mut signals = Vec::new();
    let mut i = 0;

    while i < words.len() {
        let longest = MAX_TOKEN_WORDS.min(words.len() - i);
        let mut consumed = 1;
        for n in (1..=longest).rev() {
            let candidate = words[i..i + n].join("_");
            if let Some(found) = lookup(&candidate) {
                signals.extend_from_slice(found);
                consumed = n;
                break;
            }
        }
        i += consumed;
    }
    signals
}

/// Parsed view of a response set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    signals: BTreeSet<Signal>,
    ordinals: [Option<usize>; 7],
}

impl Profile {
    pub fn parse(responses: &UserResponseSet) -> Self {
        let normalized: Vec<(String, String)> = responses
            .answers
            .iter()
            .map(|a| (normalize(&a.category), normalize(&a.value)))
            .collect();

        let mut signals = BTreeSet::new();
        for (key, value) in &normalized {
            let about_health = key.contains("salud") || value.contains("salud");
            for signal in tokenize(value) {
                let health_only = matches!(signal, HealthImportant | HealthVeryImportant);
                if health_only && !about_health {
                    continue;
                }
                signals.insert(signal);
            }
        }

        let mut ordinals = [None; 7];
        for (slot, matcher) in ordinals.iter_mut().zip(CATEGORY_MATCHERS.iter()) {
            *slot = resolve_ordinal(matcher, &normalized);
        }

        Self { signals, ordinals }
    }

    pub fn has(&self, signal: Signal) -> bool {
        self.signals.contains(&signal)
    }

    pub fn has_any(&self, signals: &[Signal]) -> bool {
        signals.iter().any(|s| self.signals.contains(s))
    }

    pub fn signals(&self) -> impl Iterator<Item = Signal> + '_ {
        self.signals.iter().copied()
    }

    /// Ordinal (0-4) for a category, if an answer resolved it
    pub fn ordinal(&self, category: OrdinalCategory) -> Option<usize> {
        CATEGORY_MATCHERS
            .iter()
            .position(|m| m.category == category)
            .and_then(|i| self.ordinals[i])
    }

    /// All seven ordinals in feature order, neutral 2 where unresolved
    pub fn ordinal_features(&self) -> [f64; 7] {
        let mut out = [2.0; 7];
        for (o, v) in out.iter_mut().zip(self.ordinals.iter()) {
            if let Some(v) = v {
                *o = *v as f64;
            }
        }
        out
    }

    /// Wants sugar-light drinks (natural or sugar-free)
    pub fn prefers_natural(&self) -> bool {
        self.has_any(&[Natural, SugarFree])
    }

    pub fn needs_energy(&self) -> bool {
        self.has_any(&[Stressful, Busy])
    }
}

fn resolve_ordinal(matcher: &CategoryMatcher, answers: &[(String, String)]) -> Option<usize> {
    let in_domain = |value: &str| matcher.domain.iter().position(|d| *d == value);

    let keyed = answers.iter().find_map(|(key, value)| {
        if matcher.aliases.iter().any(|alias| key.contains(alias)) {
            in_domain(value)
        } else {
            None
        }
    });
    if keyed.is_some() {
        return keyed;
    }

    answers.iter().find_map(|(_, value)| {
        let idx = in_domain(value)?;
        let shared = CATEGORY_MATCHERS
            .iter()
            .filter(|other| other.category != matcher.category)
            .any(|other| other.domain.contains(&value.as_str()));
        (!shared).then_some(idx)
    })
}

/// Stable seed derived from the canonical form of a response set
///
/// Answers are normalized and sorted so ordering and casing do not matter.
pub fn response_seed(responses: &UserResponseSet) -> u64 {
    let mut pairs: Vec<(String, String)> = responses
        .answers
        .iter()
        .map(|a| (normalize(&a.category), normalize(&a.value)))
        .collect();
    pairs.sort();

    let mut hasher = Sha256::new();
    for (k, v) in &pairs {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
