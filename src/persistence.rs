//! Versioned model files
//!
//! Each model family is saved as one JSON envelope:
//! - `format_version`: layout of the envelope itself
//! - `encoder_version`: feature layout the models were fitted on
//! - `model_version`: bumped on every successful retrain
//! - `checksum`: SHA-256 (hex) of the payload text
//!
//! Writes go to a temp file in the same directory, are fsynced, then renamed
//! over the previous file, so a crash never leaves a half-written model.

use crate::features::ENCODER_VERSION;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub format_version: u32,
    pub encoder_version: u32,
    pub family: String,
    pub model_version: u32,
    pub saved_at: DateTime<Utc>,
    pub checksum: String,
    /// Serialized model payload; the checksum covers exactly these bytes
    pub payload: String,
}

/// A payload read back from disk with its envelope metadata
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub payload: T,
    pub model_version: u32,
    pub saved_at: DateTime<Utc>,
}

/// Hash content with SHA-256, hex encoded
pub fn checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

pub fn family_path(dir: &Path, family: &str) -> PathBuf {
    dir.join(format!("{}.json", family))
}

/// Serialize `payload` into an envelope and write it atomically
pub fn save_family<T: Serialize>(
    dir: &Path,
    family: &str,
    model_version: u32,
    payload: &T,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create model dir {:?}", dir))?;

    let payload = serde_json::to_string(payload)
        .with_context(|| format!("Failed to serialize {} models", family))?;
    let envelope = Envelope {
        format_version: FORMAT_VERSION,
        encoder_version: ENCODER_VERSION,
        family: family.to_string(),
        model_version,
        saved_at: Utc::now(),
        checksum: checksum(payload.as_bytes()),
        payload,
    };
    let bytes = serde_json::to_vec_pretty(&envelope)?;

    let path = family_path(dir, family);
    write_atomic(&path, &bytes)?;
    Ok(path)
}

/// Read and verify a family's envelope; `Ok(None)` if never saved
pub fn load_family<T: DeserializeOwned>(dir: &Path, family: &str) -> Result<Option<Loaded<T>>> {
    let path = family_path(dir, family);
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
    let envelope: Envelope = serde_json::from_slice(&bytes)
        .with_context(|| format!("Malformed model envelope {:?}", path))?;

    if envelope.format_version != FORMAT_VERSION {
        bail!(
            "Unsupported format version {} in {:?} (expected {})",
            envelope.format_version,
            path,
            FORMAT_VERSION
        );
    }
    if envelope.encoder_version != ENCODER_VERSION {
        bail!(
            "Encoder version {} in {:?} does not match current {}",
            envelope.encoder_version,
            path,
            ENCODER_VERSION
        );
    }
    if envelope.family != family {
        bail!("File {:?} holds family {:?}, not {:?}", path, envelope.family, family);
    }
    let actual = checksum(envelope.payload.as_bytes());
    if actual != envelope.checksum {
        bail!("Checksum mismatch in {:?}", path);
    }

    let payload = serde_json::from_str(&envelope.payload)
        .with_context(|| format!("Failed to decode {} payload", family))?;
    Ok(Some(Loaded {
        payload,
        model_version: envelope.model_version,
        saved_at: envelope.saved_at,
    }))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file =
            File::create(&tmp).with_context(|| format!("Failed to create {:?}", tmp))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {:?} into place", tmp))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Weights {
        values: Vec<f64>,
    }

    #[test]
    fn test_checksum() {
        let h1 = checksum(b"hello");
        let h2 = checksum(b"hello");
        let h3 = checksum(b"world");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let weights = Weights { values: vec![0.1, 1.0 / 3.0, 2.5] };
        save_family(dir.path(), "preference", 3, &weights).unwrap();

        let loaded: Loaded<Weights> = load_family(dir.path(), "preference").unwrap().unwrap();
        assert_eq!(loaded.payload, weights);
        assert_eq!(loaded.model_version, 3);
        assert!(!dir.path().join("preference.json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let loaded: Option<Loaded<Weights>> = load_family(dir.path(), "presentation").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let dir = tempdir().unwrap();
        let path = save_family(dir.path(), "preference", 1, &Weights { values: vec![1.0] }).unwrap();

        let mut envelope: Envelope =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        envelope.payload = r#"{"values":[2.0]}"#.to_string();
        fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        let result: Result<Option<Loaded<Weights>>> = load_family(dir.path(), "preference");
        assert!(result.is_err());
    }

    #[test]
    fn test_encoder_version_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = save_family(dir.path(), "preference", 1, &Weights { values: vec![1.0] }).unwrap();

        let mut envelope: Envelope =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        envelope.encoder_version = ENCODER_VERSION + 1;
        fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        let result: Result<Option<Loaded<Weights>>> = load_family(dir.path(), "preference");
        assert!(result.unwrap_err().to_string().contains("Encoder version"));
    }

    #[test]
    fn test_family_name_must_match() {
        let dir = tempdir().unwrap();
        let path = save_family(dir.path(), "preference", 1, &Weights { values: vec![] }).unwrap();
        fs::copy(&path, family_path(dir.path(), "presentation")).unwrap();

        let result: Result<Option<Loaded<Weights>>> = load_family(dir.path(), "presentation");
        assert!(result.is_err());
    }
}
