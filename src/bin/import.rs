//! Import rating exports into the training corpus
//!
//! Usage: cargo run --bin import -- /path/to/exports [more dirs...]
//!
//! Every `*.json` file under each directory holds one export record or an
//! array of them:
//!
//! ```json
//! {"responses": {...}, "beverage": {...}, "rating": 4,
//!  "presentation": {"ml": 600, "precio": 18.0}, "context": {...}}
//! ```
//!
//! Records with a presentation go to both corpora. Models are trained once
//! everything is in.

use anyhow::{Context, Result};
use refresco_engine::{
    config, BeverageRecord, Engine, EngineConfig, PresentationRecord, UserResponseSet,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct ExportRecord {
    #[serde(alias = "respuestas")]
    responses: UserResponseSet,
    #[serde(alias = "bebida")]
    beverage: BeverageRecord,
    #[serde(alias = "puntuacion")]
    rating: f64,
    #[serde(default, alias = "presentacion")]
    presentation: Option<PresentationRecord>,
    #[serde(default)]
    context: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExportFile {
    Many(Vec<ExportRecord>),
    One(ExportRecord),
}

impl ExportFile {
    fn into_records(self) -> Vec<ExportRecord> {
        match self {
            ExportFile::Many(records) => records,
            ExportFile::One(record) => vec![record],
        }
    }
}

#[derive(Debug, Default)]
struct ImportCounts {
    files: usize,
    samples: usize,
    presentation_ratings: usize,
    failed_files: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <export-dirs...>", args[0]);
        eprintln!("Example: {} ./exports/2024", args[0]);
        std::process::exit(1);
    }

    let data_dir = config::data_dir();
    let engine = Engine::open(&data_dir, EngineConfig::load(&data_dir)?)?;
    println!("Opening corpus at {:?}", data_dir.join("corpus.db"));

    let mut counts = ImportCounts::default();
    for arg in &args[1..] {
        let dir = PathBuf::from(arg);
        if !dir.exists() {
            eprintln!("Warning: {} does not exist, skipping", arg);
            continue;
        }
        println!("\nProcessing: {:?}", dir);
        import_directory(&engine, &dir, &mut counts)?;
    }

    let preference_trained = engine.retrain_if_needed(true);
    let presentation_trained = engine.train_presentations();
    engine.save()?;

    println!("\n========================================");
    println!("Import complete!");
    println!("  Files: {} ({} failed)", counts.files, counts.failed_files);
    println!("  Beverage ratings: {}", counts.samples);
    println!("  Presentation ratings: {}", counts.presentation_ratings);
    println!("  Preference model trained: {}", preference_trained);
    println!("  Presentation model trained: {}", presentation_trained);
    println!("========================================");

    Ok(())
}

fn import_directory(engine: &Engine, dir: &Path, counts: &mut ImportCounts) -> Result<()> {
    for entry in walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_file()
                && e.file_name()
                    .to_str()
                    .map(|n| n.ends_with(".json"))
                    .unwrap_or(false)
        })
    {
        let path = entry.path();
        let fname = path.file_name().and_then(|n| n.to_str()).unwrap_or("?");
        match import_file(engine, path) {
            Ok((samples, ratings)) => {
                counts.files += 1;
                counts.samples += samples;
                counts.presentation_ratings += ratings;
                println!("  ✓ {} ({} ratings)", fname, samples);
            }
            Err(e) => {
                counts.failed_files += 1;
                eprintln!("  ✗ {}: {:#}", fname, e);
            }
        }
    }
    Ok(())
}

fn import_file(engine: &Engine, path: &Path) -> Result<(usize, usize)> {
    let content = fs::read_to_string(path)?;
    let file: ExportFile = serde_json::from_str(&content).context("Not a rating export")?;

    let mut samples = 0;
    let mut ratings = 0;
    for record in file.into_records() {
        if let Some(presentation) = &record.presentation {
            engine.add_presentation_rating(
                &presentation.id_for(&record.beverage.id),
                &record.responses,
                &record.beverage,
                presentation,
                record.rating,
                record.context.clone(),
            )?;
            ratings += 1;
        }
        engine.add_training_data(&record.responses, &record.beverage, record.rating)?;
        samples += 1;
    }
    Ok((samples, ratings))
}
