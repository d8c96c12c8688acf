//! refresco - command line front end for the personalization engine
//!
//! Every command prints JSON on stdout; logs go to stderr (`RUST_LOG`).
//!
//! Run with: cargo run -- --stats

use anyhow::{bail, Context, Result};
use refresco_engine::{
    cascade, config,
    recommend::recommend,
    synthetic::{self, SyntheticConfig},
    BeverageRecord, Engine, EngineConfig, UserResponseSet,
};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: refresco <command>

Commands:
  --stats                                        Model and presentation stats
  --train [--force]                              Retrain if needed (or always)
  --predict <responses.json> <catalog.json>      Predicted rating per beverage
  --recommend <responses.json> <catalog.json>    Full recommendation
  --cascade <responses.json>                     Sodas or alternatives, and why
  --cluster <responses.json>                     User segment
  --presentations <responses.json> <catalog.json> [top_n]
                                                 Best presentations for a user
  --simulate [respondents]                       Train on synthetic data
  --size-prefs <session_id>                      Learned size preferences";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        println!("{}", USAGE);
        return Ok(());
    };

    // Pure commands need no engine
    match command.as_str() {
        "--help" | "-h" => {
            println!("{}", USAGE);
            return Ok(());
        }
        "--cascade" => {
            let responses = read_responses(arg(&args, 2, "--cascade <responses.json>")?)?;
            return print_json(&cascade::evaluate(&responses));
        }
        _ => {}
    }

    let data_dir = config::data_dir();
    let engine = Engine::open(&data_dir, EngineConfig::load(&data_dir)?)?;
    tracing::info!("Engine opened at {:?}", data_dir);

    match command.as_str() {
        "--stats" => print_json(&json!({
            "preference": engine.get_model_stats(),
            "presentation": engine.get_system_stats(),
        })),
        "--train" => {
            let force = args.iter().any(|a| a == "--force");
            let trained = engine.retrain_if_needed(force);
            let presentations = engine.train_presentations();
            print_json(&json!({
                "preference_trained": trained,
                "presentation_trained": presentations,
                "preference": engine.get_model_stats(),
                "presentation": engine.get_system_stats(),
            }))
        }
        "--predict" => {
            let usage = "--predict <responses.json> <catalog.json>";
            let responses = read_responses(arg(&args, 2, usage)?)?;
            let catalog = read_catalog(arg(&args, 3, usage)?)?;
            let predictions: Vec<_> = catalog
                .iter()
                .map(|b| {
                    json!({
                        "beverage_id": b.id,
                        "name": b.name,
                        "predicted_rating": engine.predict_preference(&responses, b),
                    })
                })
                .collect();
            print_json(&json!({
                "user_type": engine.classify_user(&responses),
                "predictions": predictions,
            }))
        }
        "--recommend" => {
            let usage = "--recommend <responses.json> <catalog.json>";
            let responses = read_responses(arg(&args, 2, usage)?)?;
            let catalog = read_catalog(arg(&args, 3, usage)?)?;
            print_json(&recommend(&engine, &responses, &catalog))
        }
        "--cluster" => {
            let responses = read_responses(arg(&args, 2, "--cluster <responses.json>")?)?;
            print_json(&json!({ "cluster": engine.get_user_cluster(&responses) }))
        }
        "--presentations" => {
            let usage = "--presentations <responses.json> <catalog.json> [top_n]";
            let responses = read_responses(arg(&args, 2, usage)?)?;
            let catalog = read_catalog(arg(&args, 3, usage)?)?;
            let top_n = match args.get(4) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("Invalid top_n: {:?}", raw))?,
                None => 5,
            };
            print_json(&engine.get_best_presentations_for_user(&responses, &catalog, top_n))
        }
        "--simulate" => {
            let respondents = match args.get(2) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("Invalid respondent count: {:?}", raw))?,
                None => SyntheticConfig::default().respondents,
            };
            let sim_config = SyntheticConfig {
                respondents,
                seed: engine.config().seed,
                ..SyntheticConfig::default()
            };
            // Simulations never touch the real corpus
            let scratch = Engine::in_memory(engine.config().clone())?;
            print_json(&synthetic::simulate(&scratch, &sim_config)?)
        }
        "--size-prefs" => {
            let session = arg(&args, 2, "--size-prefs <session_id>")?;
            print_json(&engine.analyze_user_size_preferences(session))
        }
        other => {
            eprintln!("{}", USAGE);
            bail!("Unknown command: {}", other)
        }
    }
}

fn arg<'a>(args: &'a [String], index: usize, usage: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(a) => Ok(a.as_str()),
        None => bail!("Usage: refresco {}", usage),
    }
}

fn read_responses(path: &str) -> Result<UserResponseSet> {
    let text = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid responses JSON in {}", path))
}

fn read_catalog(path: &str) -> Result<Vec<BeverageRecord>> {
    let text = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid catalog JSON in {}", path))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
