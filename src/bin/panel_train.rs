//! panel_train - fit one component's open/closed classifier
//!
//! Reads a labeled dataset (`<data>/closed`, `<data>/open`), trains with early
//! stopping on validation accuracy, prints a classification report, and writes
//! the component's artifact into the model directory.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use panel_watch::config::PanelWatchConfig;
use panel_watch::dataset;
use panel_watch::train::Trainer;
use panel_watch::Component;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Component to train (hood, front_left, front_right, rear_left, rear_right).
    #[arg(long)]
    component: Component,
    /// Dataset root holding `closed/` and `open/` subdirectories.
    #[arg(long)]
    data: PathBuf,
    /// Output directory for the artifact (overrides config).
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(&args.ui, std::io::stderr().is_terminal());

    let mut cfg = PanelWatchConfig::load()?;
    if let Some(dir) = args.model_dir {
        cfg.model_dir = dir;
    }

    let split = {
        let _stage = ui.stage("Load dataset");
        dataset::load_split(&args.data, &cfg.dataset_options())
            .with_context(|| format!("failed to load dataset {}", args.data.display()))?
    };
    log::info!(
        "{} usable images ({} closed / {} open), {} skipped",
        split.summary.per_class[0] + split.summary.per_class[1],
        split.summary.per_class[0],
        split.summary.per_class[1],
        split.summary.unreadable + split.summary.too_dark
    );

    let trainer = Trainer::new(cfg.trainer_config());
    let progress = ui.progress(trainer.config().max_epochs, "epoch");
    let trained = trainer.fit(args.component, &split, |m| {
        let marker = if m.improved { " *" } else { "" };
        progress.set(
            m.epoch,
            format!(
                "val_loss {:.4} val_acc {:.4}{}",
                m.val_loss, m.val_accuracy, marker
            ),
        )
    })?;
    progress.finish(trained.outcome.final_state.label());

    println!(
        "{}: best epoch {} of {} (val_acc {:.4}, {})",
        args.component,
        trained.outcome.best_epoch,
        trained.outcome.epochs_run,
        trained.outcome.best_val_accuracy,
        trained.outcome.final_state.label()
    );
    println!();
    print!("{}", trained.report);

    {
        let _stage = ui.stage("Write artifact");
        trained.persist(&cfg.model_dir)?;
    }
    Ok(())
}
