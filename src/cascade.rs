//! Decision cascade: surface healthy alternatives or real sodas?
//!
//! An ordered list of rules; each rule is a list of (signal, decision) arms
//! checked in order. The first arm whose signal is present decides. With no
//! match the cascade shows sodas.

use crate::answers::{Profile, Signal};
use crate::types::UserResponseSet;
use serde::Serialize;

/// One cascade rule
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub arms: &'static [(Signal, bool)],
}

/// Rules in priority order
pub const RULES: [Rule; 10] = [
    Rule {
        name: "drink_priority",
        arms: &[
            (Signal::PriorityFlavor, false),
            (Signal::PriorityHealth, true),
            (Signal::OnlyNatural, true),
        ],
    },
    Rule {
        name: "soda_relationship",
        arms: &[
            (Signal::NeverConsumes, true),
            (Signal::LovesSodas, false),
            (Signal::RejectsSodas, true),
        ],
    },
    Rule {
        name: "drink_kind",
        arms: &[
            (Signal::NaturalDrinks, true),
            (Signal::OnlyWater, true),
            (Signal::TraditionalSodas, false),
        ],
    },
    Rule {
        name: "soda_attitude",
        arms: &[(Signal::AvoidsForHealth, true)],
    },
    Rule {
        name: "sugar_level",
        arms: &[(Signal::ZeroNaturalSugar, true)],
    },
    Rule {
        name: "consumption_situation",
        arms: &[(Signal::DuringExercise, true)],
    },
    Rule {
        name: "health_factors",
        arms: &[(Signal::HealthFactor, true), (Signal::NoHealthConcern, false)],
    },
    Rule {
        name: "activity_type",
        arms: &[
            (Signal::ActivityIntensity, true),
            (Signal::SedentaryLifestyle, false),
        ],
    },
    Rule {
        name: "caffeine_attitude",
        arms: &[
            (Signal::CaffeineRejection, true),
            (Signal::CaffeineSeeking, false),
        ],
    },
    Rule {
        name: "experience_sought",
        arms: &[
            (Signal::CalmExperience, true),
            (Signal::StimulatingExperience, false),
        ],
    },
];

/// Which rule decided, and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeDecision {
    pub show_alternatives: bool,
    /// 1-based rule priority, None when the default applied
    pub rule_priority: Option<usize>,
    pub rule: Option<&'static str>,
    pub signal: Option<String>,
}

/// Evaluate the cascade over a parsed profile
pub fn evaluate_profile(profile: &Profile) -> CascadeDecision {
    for (i, rule) in RULES.iter().enumerate() {
        if let Some((signal, decision)) = rule.arms.iter().find(|(s, _)| profile.has(*s)) {
            return CascadeDecision {
                show_alternatives: *decision,
                rule_priority: Some(i + 1),
                rule: Some(rule.name),
                signal: Some(format!("{:?}", signal)),
            };
        }
    }
    CascadeDecision {
        show_alternatives: false,
        rule_priority: None,
        rule: None,
        signal: None,
    }
}

pub fn evaluate(responses: &UserResponseSet) -> CascadeDecision {
    evaluate_profile(&Profile::parse(responses))
}

/// Should the recommendation surface alternatives instead of real sodas?
pub fn should_show_alternatives(responses: &UserResponseSet) -> bool {
    evaluate(responses).show_alternatives
}
