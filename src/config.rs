use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::aggregate::FallbackPolicy;
use crate::classify::{BinaryCnnConfig, MIN_IMAGE_SIZE};
use crate::dataset::DatasetOptions;
use crate::train::TrainerConfig;

const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_VALIDATION_SPLIT: f64 = 0.2;
const DEFAULT_SEED: u64 = 42;
const DEFAULT_MAX_EPOCHS: usize = 50;
const DEFAULT_PATIENCE: usize = 4;
const DEFAULT_LEARNING_RATE: f64 = 1e-3;
const DEFAULT_MIN_BRIGHTNESS: f64 = 10.0;
const DEFAULT_AUGMENT_TARGET: usize = 5000;

pub const CONFIG_ENV: &str = "PANEL_WATCH_CONFIG";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PanelWatchConfigFile {
    model_dir: Option<PathBuf>,
    image_size: Option<u32>,
    training: Option<TrainingConfigFile>,
    dataset: Option<DatasetConfigFile>,
    augment: Option<AugmentConfigFile>,
    serving: Option<ServingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainingConfigFile {
    batch_size: Option<usize>,
    validation_split: Option<f64>,
    seed: Option<u64>,
    max_epochs: Option<usize>,
    patience: Option<usize>,
    learning_rate: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DatasetConfigFile {
    min_brightness: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AugmentConfigFile {
    target_count: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServingConfigFile {
    fallback_policy: Option<FallbackPolicy>,
}

#[derive(Debug, Clone)]
pub struct PanelWatchConfig {
    pub model_dir: PathBuf,
    /// Serving and training resolution (square side, pixels).
    pub image_size: u32,
    pub training: TrainingSettings,
    pub min_brightness: f64,
    pub augment_target: usize,
    pub fallback_policy: FallbackPolicy,
}

#[derive(Debug, Clone)]
pub struct TrainingSettings {
    pub batch_size: usize,
    pub validation_split: f64,
    pub seed: u64,
    pub max_epochs: usize,
    pub patience: usize,
    pub learning_rate: f64,
}

impl Default for PanelWatchConfig {
    fn default() -> Self {
        Self::from_file(PanelWatchConfigFile::default())
    }
}

impl PanelWatchConfig {
    /// Defaults, then the file named by `PANEL_WATCH_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PanelWatchConfigFile) -> Self {
        let training = file.training.unwrap_or_default();
        Self {
            model_dir: file
                .model_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
            image_size: file.image_size.unwrap_or(crate::DEFAULT_IMAGE_SIZE),
            training: TrainingSettings {
                batch_size: training.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
                validation_split: training
                    .validation_split
                    .unwrap_or(DEFAULT_VALIDATION_SPLIT),
                seed: training.seed.unwrap_or(DEFAULT_SEED),
                max_epochs: training.max_epochs.unwrap_or(DEFAULT_MAX_EPOCHS),
                patience: training.patience.unwrap_or(DEFAULT_PATIENCE),
                learning_rate: training.learning_rate.unwrap_or(DEFAULT_LEARNING_RATE),
            },
            min_brightness: file
                .dataset
                .and_then(|d| d.min_brightness)
                .unwrap_or(DEFAULT_MIN_BRIGHTNESS),
            augment_target: file
                .augment
                .and_then(|a| a.target_count)
                .unwrap_or(DEFAULT_AUGMENT_TARGET),
            fallback_policy: file
                .serving
                .and_then(|s| s.fallback_policy)
                .unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("PANEL_WATCH_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.model_dir = PathBuf::from(dir);
            }
        }
        if let Some(size) = env_number("PANEL_WATCH_IMAGE_SIZE")? {
            self.image_size = size;
        }
        if let Some(seed) = env_number("PANEL_WATCH_SEED")? {
            self.training.seed = seed;
        }
        if let Some(epochs) = env_number("PANEL_WATCH_MAX_EPOCHS")? {
            self.training.max_epochs = epochs;
        }
        if let Some(patience) = env_number("PANEL_WATCH_PATIENCE")? {
            self.training.patience = patience;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if (self.image_size as usize) < MIN_IMAGE_SIZE {
            return Err(anyhow!(
                "image_size must be at least {} (got {})",
                MIN_IMAGE_SIZE,
                self.image_size
            ));
        }
        let split = self.training.validation_split;
        if !(split > 0.0 && split < 1.0) {
            return Err(anyhow!(
                "training.validation_split must be in (0, 1) (got {})",
                split
            ));
        }
        if !(0.0..=255.0).contains(&self.min_brightness) {
            return Err(anyhow!(
                "dataset.min_brightness must be in [0, 255] (got {})",
                self.min_brightness
            ));
        }
        self.trainer_config().validate()
    }

    pub fn dataset_options(&self) -> DatasetOptions {
        DatasetOptions {
            image_size: self.image_size,
            validation_split: self.training.validation_split,
            seed: self.training.seed,
            min_brightness: self.min_brightness,
        }
    }

    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            model: BinaryCnnConfig::new().with_image_size(self.image_size as usize),
            batch_size: self.training.batch_size,
            max_epochs: self.training.max_epochs,
            patience: self.training.patience,
            learning_rate: self.training.learning_rate,
            seed: self.training.seed,
        }
    }
}

fn read_config_file(path: &Path) -> Result<PanelWatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", key)),
        _ => Ok(None),
    }
}
