//! panel_augment - top up a labeled dataset with transformed copies
//!
//! Every class folder under `--data` holding fewer than `--target` images gets
//! flipped, rotated, brightened or contrast-stretched copies until it reaches the
//! target. Folders that already meet it are left untouched.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use panel_watch::augment::augment_dataset;
use panel_watch::config::PanelWatchConfig;
use panel_watch::CLASS_NAMES;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Dataset root holding `closed/` and `open/` subdirectories.
    #[arg(long)]
    data: PathBuf,
    /// Images per class after augmentation (defaults to config `augment.target_count`).
    #[arg(long)]
    target: Option<usize>,
    /// Seed for reproducible output.
    #[arg(long)]
    seed: Option<u64>,
    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(&args.ui, std::io::stderr().is_terminal());

    let cfg = PanelWatchConfig::load()?;
    let target = args.target.unwrap_or(cfg.augment_target);

    let report = {
        let _stage = ui.stage("Augment dataset");
        let progress = ui.progress(CLASS_NAMES.len(), "class");
        let mut done = 0;
        let report = augment_dataset(&args.data, target, args.seed, |class| {
            done += 1;
            progress.set(
                done,
                format!("{}: {} + {}", class.class, class.before, class.generated),
            );
        })?;
        progress.finish(&format!("{} images generated", report.generated()));
        report
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
