//! Engine configuration
//!
//! Resolution order: built-in defaults, then `config.json` in the data
//! directory (if present), then `REFRESCO_*` environment variables.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "REFRESCO_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum corpus size before the preference model trains
    pub min_training_samples: usize,
    /// Retrain after this many new samples
    pub retrain_every: usize,
    /// Minimum presentation ratings before presentation models train
    pub presentation_min_samples: usize,
    /// Upper bound for `train_with_timeout`
    pub train_timeout_secs: u64,
    /// Seed for every estimator and split
    pub seed: u64,
    pub max_sodas: usize,
    pub max_alternatives: usize,
    pub max_alternatives_non_consumer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_training_samples: 10,
            retrain_every: 5,
            presentation_min_samples: 20,
            train_timeout_secs: 30,
            seed: 42,
            max_sodas: 3,
            max_alternatives: 3,
            max_alternatives_non_consumer: 4,
        }
    }
}

impl EngineConfig {
    /// Defaults + `config.json` in `data_dir` + process environment
    pub fn load(data_dir: &Path) -> Result<Self> {
        let mut config = Self::from_file_or_default(&data_dir.join("config.json"))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn from_file_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {:?}", path))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config at {:?}", path))
    }

    /// Apply `REFRESCO_*` overrides from a key lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
            match raw.trim().parse() {
                Ok(v) => Ok(v),
                Err(_) => bail!("Invalid value for {}: {:?}", key, raw),
            }
        }

        let usize_fields: [(&str, &mut usize); 6] = [
            ("REFRESCO_MIN_TRAINING_SAMPLES", &mut self.min_training_samples),
            ("REFRESCO_RETRAIN_EVERY", &mut self.retrain_every),
            ("REFRESCO_PRESENTATION_MIN_SAMPLES", &mut self.presentation_min_samples),
            ("REFRESCO_MAX_SODAS", &mut self.max_sodas),
            ("REFRESCO_MAX_ALTERNATIVES", &mut self.max_alternatives),
            (
                "REFRESCO_MAX_ALTERNATIVES_NON_CONSUMER",
                &mut self.max_alternatives_non_consumer,
            ),
        ];
        for (key, slot) in usize_fields {
            if let Some(raw) = lookup(key) {
                *slot = parse(key, &raw)?;
            }
        }

        if let Some(raw) = lookup("REFRESCO_TRAIN_TIMEOUT_SECS") {
            self.train_timeout_secs = parse("REFRESCO_TRAIN_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("REFRESCO_SEED") {
            self.seed = parse("REFRESCO_SEED", &raw)?;
        }
        Ok(())
    }
}

/// Data directory: `$REFRESCO_DATA_DIR`, else the platform local data dir
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("refresco")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.min_training_samples, 10);
        assert_eq!(c.retrain_every, 5);
        assert_eq!(c.presentation_min_samples, 20);
        assert_eq!(c.seed, 42);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REFRESCO_RETRAIN_EVERY", "2"),
            ("REFRESCO_SEED", "7"),
        ]
        .into_iter()
        .collect();

        let mut c = EngineConfig::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.retrain_every, 2);
        assert_eq!(c.seed, 7);
        assert_eq!(c.min_training_samples, 10);
    }

    #[test]
    fn test_bad_env_value_is_error() {
        let mut c = EngineConfig::default();
        let result = c.apply_env(|k| (k == "REFRESCO_MAX_SODAS").then(|| "lots".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"min_training_samples": 3}"#).unwrap();
        let c = EngineConfig::from_file_or_default(&dir.path().join("config.json")).unwrap();
        assert_eq!(c.min_training_samples, 3);
        assert_eq!(c.retrain_every, 5);
    }
}
