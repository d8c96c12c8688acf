//! Database layer for the training corpus
//!
//! Uses SQLite with two append-only tables: beverage preference samples and
//! presentation ratings. Feature vectors and free-form context are stored as
//! JSON text. Rows are only ever inserted, never updated or deleted.
//!
//! Every row records the encoder version of its feature vector. Rows from
//! databases created before that column existed read as version 0.

use crate::types::{PresentationRatingRecord, TrainingSample};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;

/// Initialize the database with schema
pub fn init_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {:?}", path))?;

    conn.execute_batch(SCHEMA)?;
    add_encoder_version_columns(&conn)?;

    Ok(conn)
}

/// In-memory database for tests and simulations
pub fn init_memory_db() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
    conn.execute_batch(SCHEMA)?;
    add_encoder_version_columns(&conn)?;
    Ok(conn)
}

/// Older corpora lack `encoder_version`; add it with 0 (unknown encoder)
fn add_encoder_version_columns(conn: &Connection) -> Result<()> {
    for table in ["training_samples", "presentation_ratings"] {
        let present = conn
            .prepare(&format!(
                "SELECT 1 FROM pragma_table_info('{}') WHERE name = 'encoder_version'",
                table
            ))?
            .exists([])?;
        if !present {
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN encoder_version INTEGER NOT NULL DEFAULT 0",
                table
            ))
            .with_context(|| format!("Failed to add encoder_version to {}", table))?;
            tracing::info!(table, "Added encoder_version column");
        }
    }
    Ok(())
}

const SCHEMA: &str = r#"
-- Preference samples: encoded (user, beverage) vector and its rating
CREATE TABLE IF NOT EXISTS training_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    features_json TEXT NOT NULL,    -- JSON array of f64
    encoder_version INTEGER NOT NULL DEFAULT 0,
    rating REAL NOT NULL,
    session_id TEXT,
    beverage_id TEXT NOT NULL,
    created_at TEXT NOT NULL        -- RFC 3339
);

-- Presentation ratings: one rating of one size/price variant
CREATE TABLE IF NOT EXISTS presentation_ratings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    presentation_id TEXT NOT NULL,
    session_id TEXT,
    beverage_id TEXT NOT NULL,
    volume_ml INTEGER NOT NULL,
    price REAL NOT NULL,
    rating REAL NOT NULL,
    features_json TEXT NOT NULL,
    encoder_version INTEGER NOT NULL DEFAULT 0,
    context_json TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_samples_session ON training_samples(session_id);
CREATE INDEX IF NOT EXISTS idx_ratings_session ON presentation_ratings(session_id);
CREATE INDEX IF NOT EXISTS idx_ratings_presentation ON presentation_ratings(presentation_id);
"#;

// ============================================================================
// Preference samples
// ============================================================================

/// Append a preference sample
pub fn insert_training_sample(conn: &Connection, sample: &TrainingSample) -> Result<()> {
    let features_json = serde_json::to_string(&sample.features)?;
    conn.execute(
        r#"
        INSERT INTO training_samples (features_json, rating, session_id, beverage_id, created_at,
                                      encoder_version)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            features_json,
            sample.rating,
            sample.session_id,
            sample.beverage_id,
            sample.timestamp.to_rfc3339(),
            sample.encoder_version,
        ],
    )
    .context("Failed to insert training sample")?;
    Ok(())
}

/// Load every preference sample in insertion order
pub fn load_training_samples(conn: &Connection) -> Result<Vec<TrainingSample>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT features_json, rating, session_id, beverage_id, created_at, encoder_version
        FROM training_samples
        ORDER BY id
        "#,
    )?;

    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, u32>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(features_json, rating, session_id, beverage_id, created_at, encoder_version)| {
            Ok(TrainingSample {
                features: parse_features(&features_json)?,
                encoder_version,
                rating,
                timestamp: parse_timestamp(&created_at)?,
                session_id,
                beverage_id,
            })
        })
        .collect()
}

pub fn count_training_samples(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM training_samples", [], |row| row.get(0))?;
    Ok(count as usize)
}

// ============================================================================
// Presentation ratings
// ============================================================================

/// Append a presentation rating
pub fn insert_presentation_rating(conn: &Connection, record: &PresentationRatingRecord) -> Result<()> {
    let features_json = serde_json::to_string(&record.features)?;
    let context_json = if record.context.is_null() {
        None
    } else {
        Some(serde_json::to_string(&record.context)?)
    };
    conn.execute(
        r#"
        INSERT INTO presentation_ratings (presentation_id, session_id, beverage_id, volume_ml,
                                          price, rating, features_json, context_json, created_at,
                                          encoder_version)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            record.presentation_id,
            record.session_id,
            record.beverage_id,
            record.volume_ml,
            record.price,
            record.rating,
            features_json,
            context_json,
            record.timestamp.to_rfc3339(),
            record.encoder_version,
        ],
    )
    .context("Failed to insert presentation rating")?;
    Ok(())
}

/// Load every presentation rating in insertion order
pub fn load_presentation_ratings(conn: &Connection) -> Result<Vec<PresentationRatingRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT presentation_id, session_id, beverage_id, volume_ml, price, rating,
               features_json, context_json, created_at, encoder_version
        FROM presentation_ratings
        ORDER BY id
        "#,
    )?;

    let raw = stmt
        .query_map([], RawRating::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter().map(RawRating::into_record).collect()
}

pub fn count_presentation_ratings(conn: &Connection) -> Result<usize> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM presentation_ratings", [], |row| row.get(0))?;
    Ok(count as usize)
}

struct RawRating {
    presentation_id: String,
    session_id: Option<String>,
    beverage_id: String,
    volume_ml: u32,
    price: f64,
    rating: f64,
    features_json: String,
    context_json: Option<String>,
    created_at: String,
    encoder_version: u32,
}

impl RawRating {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            presentation_id: row.get(0)?,
            session_id: row.get(1)?,
            beverage_id: row.get(2)?,
            volume_ml: row.get(3)?,
            price: row.get(4)?,
            rating: row.get(5)?,
            features_json: row.get(6)?,
            context_json: row.get(7)?,
            created_at: row.get(8)?,
            encoder_version: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<PresentationRatingRecord> {
        let context = match self.context_json {
            Some(text) => serde_json::from_str(&text)
                .with_context(|| format!("Bad context JSON for {}", self.presentation_id))?,
            None => serde_json::Value::Null,
        };
        Ok(PresentationRatingRecord {
            presentation_id: self.presentation_id,
            session_id: self.session_id,
            beverage_id: self.beverage_id,
            volume_ml: self.volume_ml,
            price: self.price,
            rating: self.rating,
            features: parse_features(&self.features_json)?,
            encoder_version: self.encoder_version,
            timestamp: parse_timestamp(&self.created_at)?,
            context,
        })
    }
}

fn parse_features(text: &str) -> Result<Vec<f64>> {
    serde_json::from_str(text).context("Bad feature vector JSON")
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("Bad timestamp {:?}", text))?;
    Ok(parsed.with_timezone(&Utc))
}
