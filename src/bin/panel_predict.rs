//! panel_predict - open/closed status report for one image
//!
//! Loads every component's classifier from the model directory (falling back to the
//! untrained classifier where an artifact is missing or unusable) and prints the
//! status report as JSON on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use panel_watch::config::PanelWatchConfig;
use panel_watch::{Aggregator, ClassifierRegistry};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to classify (JPEG or PNG).
    image: PathBuf,
    /// Model directory (overrides config).
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// Include provenance, raw probabilities and errors per component.
    #[arg(long)]
    detailed: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = PanelWatchConfig::load()?;
    if let Some(dir) = args.model_dir {
        cfg.model_dir = dir;
    }

    let registry = ClassifierRegistry::load(&cfg.model_dir, cfg.image_size);
    log::info!(
        "{} of {} components served by trained classifiers",
        registry.load_summary().trained_count(),
        registry.len()
    );
    let aggregator =
        Aggregator::new(Arc::new(registry)).with_fallback_policy(cfg.fallback_policy);

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let input = aggregator
        .preprocessor()
        .prepare_bytes(&bytes)
        .with_context(|| format!("invalid image {}", args.image.display()))?;
    let evaluation = aggregator.evaluate_prepared(&input);

    let json = if args.detailed {
        serde_json::to_string_pretty(&evaluation.detailed())?
    } else {
        serde_json::to_string_pretty(&evaluation.report())?
    };
    println!("{json}");
    Ok(())
}
