//! Feature encoding
//!
//! Pure functions turning answers, beverages and presentations into fixed
//! length numeric vectors. Vector layouts are tied to [`ENCODER_VERSION`];
//! persisted models record it and are rejected on mismatch.

use crate::answers::{Profile, Signal};
use crate::types::{BeverageRecord, PresentationRecord, SizeCategory, UserResponseSet};

/// Bump whenever any vector layout below changes
pub const ENCODER_VERSION: u32 = 1;

pub const USER_DIM: usize = 10;
pub const BEVERAGE_DIM: usize = 8;
pub const PREFERENCE_DIM: usize = USER_DIM + BEVERAGE_DIM;
pub const PRESENTATION_DIM: usize = 33;

/// Encode a response set into the 10-dim user vector
pub fn encode_user(responses: &UserResponseSet) -> [f64; USER_DIM] {
    encode_profile(&Profile::parse(responses))
}

/// Encode an already-parsed profile
pub fn encode_profile(profile: &Profile) -> [f64; USER_DIM] {
    let mut out = [0.0; USER_DIM];

    // Ordinals: consumption, activity, sweetness, mood, time, novelty, health (neutral 2)
    out[..7].copy_from_slice(&profile.ordinal_features());

    // Health: activity + natural preference
    let mut health = 0.0;
    if profile.has(Signal::Active) {
        health += 2.0;
    }
    if profile.has(Signal::Natural) {
        health += 2.0;
    }
    out[7] = health;

    out[8] = if profile.has(Signal::VerySweet) {
        4.0
    } else if profile.has(Signal::Sweet) {
        3.0
    } else if profile.prefers_natural() {
        0.0
    } else {
        2.0
    };

    out[9] = if profile.needs_energy() {
        4.0
    } else if profile.has(Signal::Calm) {
        1.0
    } else {
        2.0
    };

    out
}

/// Encode a beverage into its 8-dim vector
pub fn encode_beverage(beverage: &BeverageRecord) -> [f64; BEVERAGE_DIM] {
    let calories = beverage.calories.index() as f64;
    let mut health = 4.0 - calories;
    if !beverage.is_real_soda {
        health += 2.0;
    }

    [
        beverage.sweetness,
        if beverage.is_energizing { 1.0 } else { 0.0 },
        if beverage.is_real_soda { 1.0 } else { 0.0 },
        beverage.category.index() as f64,
        beverage.flavor.index() as f64,
        calories,
        health,
        (beverage.base_price / 100.0).min(1.0),
    ]
}

/// User vector followed by beverage vector (18 dims)
pub fn encode_preference_row(responses: &UserResponseSet, beverage: &BeverageRecord) -> Vec<f64> {
    encode_preference_profile(&Profile::parse(responses), beverage)
}

pub fn encode_preference_profile(profile: &Profile, beverage: &BeverageRecord) -> Vec<f64> {
    let mut row = Vec::with_capacity(PREFERENCE_DIM);
    row.extend_from_slice(&encode_profile(profile));
    row.extend_from_slice(&encode_beverage(beverage));
    row
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Rank among siblings: count strictly below `value`, over max(n - 1, 1)
fn sibling_rank(value: f64, siblings: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = siblings.clone().count();
    let below = siblings.filter(|s| *s < value).count();
    below as f64 / n.saturating_sub(1).max(1) as f64
}

/// Encode a presentation in the context of its beverage and (optionally) the user
pub fn encode_presentation(
    presentation: &PresentationRecord,
    beverage: Option<&BeverageRecord>,
    user: Option<&Profile>,
) -> Vec<f64> {
    let mut features = Vec::with_capacity(PRESENTATION_DIM);
    let volume = f64::from(presentation.volume_ml);
    let price = presentation.price;

    // Raw size and price (5)
    features.extend([
        volume,
        price,
        presentation.price_per_ml(),
        volume.ln_1p(),
        price.max(0.0).ln_1p(),
    ]);

    // Size bin one-hot (5, all zero for special sizes)
    let size = presentation.size_category();
    features.extend(SizeCategory::BINNED.iter().map(|c| flag(*c == size)));

    // Parent beverage (14)
    match beverage {
        Some(b) => {
            let prices = b.presentations.iter().map(|p| p.price);
            let sizes = b.presentations.iter().map(|p| f64::from(p.volume_ml));
            features.extend([
                b.presentations.len() as f64,
                sibling_rank(price, prices),
                sibling_rank(volume, sizes),
                b.ml_categories.len() as f64,
                flag(b.has_category("sin_azucar")),
                flag(b.has_category("cola")),
                flag(b.has_category("citricos")),
                flag(b.has_category("agua")),
                flag(b.has_category("jugos")),
                b.tags.len() as f64,
                flag(b.has_tag("premium")),
                flag(b.has_tag("economico")),
                flag(b.has_tag("saludable")),
                flag(b.has_tag("familiar")),
            ]);
        }
        None => features.extend([0.0; 14]),
    }

    // User context (5)
    match user {
        Some(p) => features.extend([
            flag(p.has(Signal::Active)),
            flag(p.has(Signal::Family)),
            flag(p.has(Signal::Busy)),
            flag(p.has(Signal::Economical)),
            flag(p.has(Signal::Premium)),
        ]),
        None => features.extend([0.0; 5]),
    }

    // Static size factors (4)
    features.extend(size.preference_factors());

    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BeverageCategory, CalorieLevel};

    fn water() -> BeverageRecord {
        let mut b = BeverageRecord::new("agua", "Agua Natural");
        b.category = BeverageCategory::Water;
        b.calories = CalorieLevel::Zero;
        b.is_real_soda = false;
        b.sweetness = 0.0;
        b.base_price = 150.0;
        b
    }

    #[test]
    fn test_user_vector_defaults_are_neutral() {
        let v = encode_user(&UserResponseSet::default());
        assert_eq!(v, [2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 0.0, 2.0, 2.0]);
    }

    #[test]
    fn test_user_vector_scores() {
        let r = UserResponseSet::from_pairs([
            ("fisico", "muy_activo"),
            ("preferencias_dulzura", "natural"),
            ("estado_animo", "estresante"),
        ]);
        let v = encode_user(&r);
        assert_eq!(v[1], 4.0);
        assert_eq!(v[2], 0.0);
        assert_eq!(v[3], 4.0);
        assert_eq!(v[7], 4.0);
        assert_eq!(v[8], 0.0);
        assert_eq!(v[9], 4.0);
    }

    #[test]
    fn test_beverage_vector() {
        let v = encode_beverage(&water());
        assert_eq!(v, [0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 6.0, 1.0]);
    }

    #[test]
    fn test_encoders_are_pure() {
        let r = UserResponseSet::from_pairs([("fisico", "activo"), ("temporal", "manana")]);
        assert_eq!(encode_preference_row(&r, &water()), encode_preference_row(&r, &water()));
        assert_eq!(encode_preference_row(&r, &water()).len(), PREFERENCE_DIM);
    }

    #[test]
    fn test_presentation_vector_layout() {
        let mut b = water();
        b.presentations = vec![
            PresentationRecord::new(355, 15.0),
            PresentationRecord::new(600, 20.0),
            PresentationRecord::new(2000, 40.0),
        ];
        b.tags = vec!["saludable".into()];
        let p = &b.presentations[1];
        let v = encode_presentation(p, Some(&b), None);

        assert_eq!(v.len(), PRESENTATION_DIM);
        assert_eq!(v[0], 600.0);
        // personal bin
        assert_eq!(&v[5..10], &[0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(v[10], 3.0);
        assert_eq!(v[11], 0.5);
        assert_eq!(v[12], 0.5);
        assert_eq!(v[22], 1.0);
        assert_eq!(&v[29..33], &[0.7, 0.6, 0.8, 0.7]);
    }

    #[test]
    fn test_special_size_has_no_bin() {
        let p = PresentationRecord::new(20000, 300.0);
        let v = encode_presentation(&p, None, None);
        assert_eq!(v.len(), PRESENTATION_DIM);
        assert!(v[5..10].iter().all(|x| *x == 0.0));
        assert_eq!(&v[29..33], &[0.5; 4]);
    }

    #[test]
    fn test_user_context_flags() {
        let profile = Profile::parse(&UserResponseSet::from_pairs([
            ("contexto", "compartir en familia"),
            ("presupuesto", "economico"),
        ]));
        let v = encode_presentation(&PresentationRecord::new(500, 10.0), None, Some(&profile));
        assert_eq!(&v[24..29], &[0.0, 1.0, 0.0, 1.0, 0.0]);
    }
}
