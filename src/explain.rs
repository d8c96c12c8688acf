//! Short, user-facing reasons for a recommendation
//!
//! Reasons are derived from profile signals against beverage attributes, in
//! a fixed order: consumption, activity, sweetness, health, mood, then one
//! line about the beverage category and one about the predicted fit.

use crate::answers::{OrdinalCategory, Profile, Signal};
use crate::types::{BeverageCategory, BeverageRecord, CalorieLevel};

fn is_lighter(beverage: &BeverageRecord) -> bool {
    matches!(beverage.calories, CalorieLevel::Low | CalorieLevel::VeryLow)
}

/// Reasons this beverage suits this profile
pub fn explain(profile: &Profile, beverage: &BeverageRecord, predicted_rating: f64) -> Vec<String> {
    let mut reasons: Vec<&'static str> = Vec::new();
    let soda = beverage.is_real_soda;

    // Consumption
    match profile.ordinal(OrdinalCategory::Consumption) {
        Some(0) => reasons.push(if soda {
            "Aunque evitas los refrescos, esta podría ser una excepción"
        } else {
            "Ideal si prefieres evitar los refrescos tradicionales"
        }),
        Some(3) | Some(4) if soda => reasons.push("Encaja con tu consumo habitual de refrescos"),
        _ => {}
    }

    // Activity
    if profile.has(Signal::Active) {
        if beverage.is_energizing {
            reasons.push("Acompaña bien tu estilo de vida activo");
        } else if !soda {
            reasons.push("Una opción saludable para alguien que se mueve tanto como tú");
        } else if is_lighter(beverage) {
            reasons.push("Baja en calorías, buena para personas activas");
        }
    } else if profile.has_any(&[Signal::Sedentary, Signal::Inactive]) && soda {
        reasons.push("Un clásico para tus momentos de descanso");
    }

    // Sweetness
    if profile.has(Signal::Sweet) {
        if beverage.sweetness >= 7.0 {
            reasons.push("Coincide con tu gusto por los sabores dulces");
        } else if beverage.sweetness >= 5.0 {
            reasons.push("Un dulzor equilibrado para tu paladar");
        }
    } else if profile.has_any(&[Signal::Natural, Signal::LightlySweet, Signal::SugarFree]) {
        if beverage.sweetness <= 3.0 {
            reasons.push("Va con tu preferencia por sabores naturales y poco dulces");
        } else if !soda {
            reasons.push("Una opción más natural que se adapta a tus gustos");
        }
    }

    // Health
    if profile.has(Signal::HealthImportant) {
        if !soda {
            reasons.push("Una elección saludable que cuida tu bienestar");
        } else if is_lighter(beverage) {
            reasons.push("Más ligera, pensando en tu interés por la salud");
        }
    }

    // Mood
    if profile.needs_energy() {
        if beverage.is_energizing {
            reasons.push("Te dará energía extra en tus días ocupados");
        } else if beverage.category == BeverageCategory::Tea {
            reasons.push("Perfecta para relajarte después de un día intenso");
        } else if beverage.category == BeverageCategory::Cola {
            reasons.push("Un clásico reconfortante para momentos intensos");
        }
    } else if profile.has_any(&[Signal::Calm, Signal::Relaxed]) {
        reasons.push(match beverage.category {
            BeverageCategory::Water | BeverageCategory::Tea | BeverageCategory::Juice => {
                "Se adapta a tu estilo de vida tranquilo"
            }
            _ => "Para disfrutarla sin prisa",
        });
    }

    reasons.push(category_line(beverage.category));

    if predicted_rating >= 4.5 {
        reasons.push("Altísima compatibilidad con tu perfil");
    } else if predicted_rating >= 4.0 {
        reasons.push("Muy alta compatibilidad con tus preferencias");
    } else if predicted_rating >= 3.5 {
        reasons.push("Buena compatibilidad con tu estilo de vida");
    }

    reasons.into_iter().map(String::from).collect()
}

fn category_line(category: BeverageCategory) -> &'static str {
    match category {
        BeverageCategory::Cola => "Un clásico que nunca pasa de moda",
        BeverageCategory::Citrus => "Refrescante, con un toque cítrico que revitaliza",
        BeverageCategory::Fruit => "Sabor frutal con dulzor natural",
        BeverageCategory::Energy => "Un impulso extra cuando lo necesitas",
        BeverageCategory::Water => "La forma más pura de hidratarte",
        BeverageCategory::Juice => "Sabor natural con aporte nutricional",
        BeverageCategory::Tea => "Relajante y con beneficios para la salud",
    }
}
