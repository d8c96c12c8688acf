//! User type classification
//!
//! Ordered checks, first match wins:
//! 1. Non-consumer consumption answer (terminal)
//! 2. Response timing (too fast to be a real respondent)
//! 3. Positional answer patterns (same option every time, or marching through options)
//! 4. Regular

use crate::answers::normalize;
use crate::types::{UserResponseSet, UserType};

const NON_CONSUMER_VALUES: [&str; 3] = ["nunca", "casi_nunca", "no_consume_refrescos"];
const CONSUMPTION_KEYS: [&str; 2] = ["consumo_base", "frecuencia"];
const ORDINAL_WORDS: [&str; 5] = ["primera", "segunda", "tercera", "cuarta", "quinta"];

/// Minimum response times before timing is judged
const MIN_TIMED_ANSWERS: usize = 3;
const FAST_ANSWER_SECS: f64 = 2.0;
const FAST_FRACTION: f64 = 0.7;
const MIN_MEAN_SECS: f64 = 3.0;
const MIN_POSITIONED_ANSWERS: usize = 4;

/// Classify a respondent
pub fn classify(responses: &UserResponseSet, response_times: &[f64]) -> UserType {
    if is_non_consumer(responses) {
        return UserType::NonConsumer;
    }
    if timing_looks_automated(response_times) {
        return UserType::TestUser;
    }
    if positions_look_patterned(responses) {
        return UserType::TestUser;
    }
    UserType::Regular
}

pub fn is_non_consumer(responses: &UserResponseSet) -> bool {
    responses.answers.iter().any(|a| {
        let key = normalize(&a.category);
        CONSUMPTION_KEYS.iter().any(|k| key.contains(k))
            && NON_CONSUMER_VALUES.contains(&normalize(&a.value).as_str())
    })
}

fn timing_looks_automated(times: &[f64]) -> bool {
    if times.len() < MIN_TIMED_ANSWERS {
        return false;
    }
    let n = times.len() as f64;
    let fast = times.iter().filter(|t| **t < FAST_ANSWER_SECS).count() as f64;
    if fast / n > FAST_FRACTION {
        return true;
    }
    times.iter().sum::<f64>() / n < MIN_MEAN_SECS
}

/// Chosen option positions, from the explicit field or an ordinal word value
fn chosen_positions(responses: &UserResponseSet) -> Vec<u8> {
    responses
        .answers
        .iter()
        .filter_map(|a| {
            a.position.or_else(|| {
                let value = normalize(&a.value);
                ORDINAL_WORDS
                    .iter()
                    .position(|w| *w == value)
                    .map(|i| i as u8 + 1)
            })
        })
        .collect()
}

fn positions_look_patterned(responses: &UserResponseSet) -> bool {
    let positions = chosen_positions(responses);
    if positions.len() < MIN_POSITIONED_ANSWERS {
        return false;
    }
    let all_same = positions.windows(2).all(|w| w[0] == w[1]);
    let ascending = positions.windows(2).all(|w| w[0] < w[1]);
    let descending = positions.windows(2).all(|w| w[0] > w[1]);
    all_same || ascending || descending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Answer;

    fn positioned(positions: &[u8]) -> UserResponseSet {
        UserResponseSet::new(
            None,
            positions
                .iter()
                .enumerate()
                .map(|(i, p)| Answer {
                    position: Some(*p),
                    ..Answer::new(format!("pregunta_{}", i), "x")
                })
                .collect(),
        )
    }

    #[test]
    fn test_non_consumer_is_terminal() {
        let r = UserResponseSet::from_pairs([("consumo_base", "nunca")]);
        // Even with bot-like timing
        assert_eq!(classify(&r, &[0.5, 0.5, 0.5]), UserType::NonConsumer);
    }

    #[test]
    fn test_casi_nunca_variants() {
        for v in ["casi nunca", "Casi-Nunca", "no_consume_refrescos"] {
            let r = UserResponseSet::from_pairs([("frecuencia_consumo", v)]);
            assert_eq!(classify(&r, &[]), UserType::NonConsumer, "{}", v);
        }
    }

    #[test]
    fn test_nunca_under_other_key_is_not_non_consumer() {
        let r = UserResponseSet::from_pairs([("ejercicio", "nunca")]);
        assert_eq!(classify(&r, &[]), UserType::Regular);
    }

    #[test]
    fn test_fast_answers() {
        let r = UserResponseSet::default();
        assert_eq!(classify(&r, &[1.0, 1.5, 1.2, 9.0]), UserType::TestUser);
        // 2 of 3 fast (66%) but mean under 3 s
        assert_eq!(classify(&r, &[1.0, 1.0, 4.0]), UserType::TestUser);
        assert_eq!(classify(&r, &[5.0, 6.0, 1.0]), UserType::Regular);
        // Too few timings to judge
        assert_eq!(classify(&r, &[0.1, 0.1]), UserType::Regular);
    }

    #[test]
    fn test_position_patterns() {
        assert_eq!(classify(&positioned(&[2, 2, 2, 2]), &[]), UserType::TestUser);
        assert_eq!(classify(&positioned(&[1, 2, 3, 4]), &[]), UserType::TestUser);
        assert_eq!(classify(&positioned(&[5, 4, 3, 2]), &[]), UserType::TestUser);
        assert_eq!(classify(&positioned(&[1, 3, 2, 4]), &[]), UserType::Regular);
        assert_eq!(classify(&positioned(&[1, 1, 1]), &[]), UserType::Regular);
    }

    #[test]
    fn test_ordinal_word_positions() {
        let r = UserResponseSet::from_pairs([
            ("pregunta_1", "primera"),
            ("pregunta_2", "primera"),
            ("pregunta_3", "primera"),
            ("pregunta_4", "primera"),
        ]);
        assert_eq!(classify(&r, &[]), UserType::TestUser);
    }
}
