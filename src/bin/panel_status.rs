//! panel_status - which components are served by trained classifiers
//!
//! Prints the registry's load summary as JSON: provenance per component plus the
//! reason any artifact could not be used.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use panel_watch::config::PanelWatchConfig;
use panel_watch::ClassifierRegistry;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Model directory (overrides config).
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// Exit with status 1 unless every component has trained parameters.
    #[arg(long)]
    require_trained: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut cfg = PanelWatchConfig::load()?;
    if let Some(dir) = args.model_dir {
        cfg.model_dir = dir;
    }

    let summary = ClassifierRegistry::load(&cfg.model_dir, cfg.image_size).load_summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if args.require_trained && !summary.fallback_components().is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
