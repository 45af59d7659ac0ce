//! Labeled image directories.
//!
//! Layout: one subdirectory per class under a root, exactly `closed/` and `open/`.
//! Labels are inferred from folder membership, alphabetically (`closed` = 0, `open` = 1).
//!
//! Loading applies the hygiene rules of the collection tooling: only jpg/jpeg/png
//! files are considered, undecodable files are skipped, and frames darker than
//! `min_brightness` (failed or blank captures) are dropped.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::preprocess::{mean_intensity, Preprocessor};
use crate::CLASS_NAMES;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Clone, Debug)]
pub struct DatasetOptions {
    /// Square side images are resized to; must match the classifier.
    pub image_size: u32,
    /// Fraction of samples held out for validation.
    pub validation_split: f64,
    pub seed: u64,
    /// Mean intensity below which an image is treated as a failed capture.
    pub min_brightness: f64,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            image_size: crate::DEFAULT_IMAGE_SIZE,
            validation_split: 0.2,
            seed: 42,
            min_brightness: 10.0,
        }
    }
}

/// A resized image with its class index.
#[derive(Clone, Debug)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub label: u8,
    pub image: RgbImage,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatasetSummary {
    pub files_seen: usize,
    pub unreadable: usize,
    pub too_dark: usize,
    /// Usable images per class index.
    pub per_class: [usize; 2],
}

/// Seeded train/validation partition of one component's dataset.
#[derive(Clone, Debug)]
pub struct SplitDataset {
    pub image_size: u32,
    pub train: Vec<LabeledImage>,
    pub validation: Vec<LabeledImage>,
    pub summary: DatasetSummary,
}

/// Load `root`, filter unusable images, and split with a fixed seed.
///
/// After a seeded shuffle the last `floor(validation_split * n)` samples form the
/// validation partition.
pub fn load_split(root: &Path, options: &DatasetOptions) -> Result<SplitDataset> {
    if !(options.validation_split > 0.0 && options.validation_split < 1.0) {
        return Err(anyhow!(
            "validation_split must be in (0, 1), got {}",
            options.validation_split
        ));
    }

    let classes = class_dirs(root)?;
    let preprocessor = Preprocessor::new(options.image_size);
    let mut summary = DatasetSummary::default();
    let mut samples = Vec::new();

    for (label, (name, dir)) in classes.iter().enumerate() {
        for path in list_images(dir)? {
            summary.files_seen += 1;
            let image = match Preprocessor::open(&path) {
                Ok(image) => image,
                Err(e) => {
                    log::debug!("skipping {}: {}", path.display(), e);
                    summary.unreadable += 1;
                    continue;
                }
            };
            if mean_intensity(&image) < options.min_brightness {
                log::debug!("skipping {}: too dark", path.display());
                summary.too_dark += 1;
                continue;
            }
            let resized = preprocessor
                .resize(&image)
                .with_context(|| format!("failed to resize {}", path.display()))?;
            summary.per_class[label] += 1;
            samples.push(LabeledImage {
                path,
                label: label as u8,
                image: resized,
            });
        }
        log::info!(
            "class '{}' (label {}): {} usable images",
            name,
            label,
            summary.per_class[label]
        );
    }

    if summary.unreadable + summary.too_dark > 0 {
        log::warn!(
            "skipped {} of {} files ({} unreadable, {} too dark)",
            summary.unreadable + summary.too_dark,
            summary.files_seen,
            summary.unreadable,
            summary.too_dark
        );
    }
    for (label, count) in summary.per_class.iter().enumerate() {
        if *count < 2 {
            return Err(anyhow!(
                "class '{}' has {} usable images; at least 2 are required",
                CLASS_NAMES[label],
                count
            ));
        }
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    samples.shuffle(&mut rng);
    let val_count = (options.validation_split * samples.len() as f64) as usize;
    if val_count == 0 || val_count == samples.len() {
        return Err(anyhow!(
            "split of {} samples at {} leaves an empty partition",
            samples.len(),
            options.validation_split
        ));
    }
    let validation = samples.split_off(samples.len() - val_count);

    Ok(SplitDataset {
        image_size: options.image_size,
        train: samples,
        validation,
        summary,
    })
}

/// The class subdirectories of `root`, in label order.
pub fn class_dirs(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !root.is_dir() {
        return Err(anyhow!("dataset directory {} not found", root.display()));
    }
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)
        .with_context(|| format!("failed to read dataset directory {}", root.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
        }
    }
    dirs.sort_by(|a, b| a.0.cmp(&b.0));

    let names: Vec<String> = dirs.iter().map(|(n, _)| n.to_ascii_lowercase()).collect();
    if names != CLASS_NAMES {
        return Err(anyhow!(
            "dataset {} must contain exactly the class folders {:?}, found {:?}",
            root.display(),
            CLASS_NAMES,
            names
        ));
    }
    Ok(dirs)
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read class directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && has_image_extension(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| e.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}
