//! Offline dataset top-up.
//!
//! Brings each class folder of a labeled dataset up to a target count by writing
//! randomly transformed copies of existing images next to them.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, RgbImage};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::dataset::{class_dirs, list_images};

/// Prefix of generated files.
pub const AUGMENTED_PREFIX: &str = "aug_";

/// Scale factors for brightness and contrast are drawn from this range.
const FACTOR_RANGE: (f32, f32) = (0.5, 1.5);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Augmentation {
    FlipHorizontal,
    FlipVertical,
    Rotate90,
    Rotate180,
    Rotate270,
    /// Scale the HSV value channel.
    Brightness(f32),
    /// `(x - mean) * factor + mean`, per channel.
    Contrast(f32),
}

impl Augmentation {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.gen_range(0..7) {
            0 => Augmentation::FlipHorizontal,
            1 => Augmentation::FlipVertical,
            2 => Augmentation::Rotate90,
            3 => Augmentation::Rotate180,
            4 => Augmentation::Rotate270,
            5 => Augmentation::Brightness(rng.gen_range(FACTOR_RANGE.0..=FACTOR_RANGE.1)),
            _ => Augmentation::Contrast(rng.gen_range(FACTOR_RANGE.0..=FACTOR_RANGE.1)),
        }
    }

    pub fn apply(&self, image: &DynamicImage) -> RgbImage {
        let rgb = image.to_rgb8();
        match *self {
            Augmentation::FlipHorizontal => image::imageops::flip_horizontal(&rgb),
            Augmentation::FlipVertical => image::imageops::flip_vertical(&rgb),
            Augmentation::Rotate90 => image::imageops::rotate90(&rgb),
            Augmentation::Rotate180 => image::imageops::rotate180(&rgb),
            Augmentation::Rotate270 => image::imageops::rotate270(&rgb),
            Augmentation::Brightness(factor) => scale_value(rgb, factor),
            Augmentation::Contrast(factor) => stretch_contrast(rgb, factor),
        }
    }
}

// V = max(r, g, b). Scaling all channels by the same factor keeps hue and
// saturation; capping the factor at 255 / V clamps V without shifting hue.
fn scale_value(mut rgb: RgbImage, factor: f32) -> RgbImage {
    for pixel in rgb.pixels_mut() {
        let v = pixel.0.iter().copied().max().unwrap_or(0);
        if v == 0 {
            continue;
        }
        let f = factor.min(255.0 / v as f32);
        for c in pixel.0.iter_mut() {
            *c = (*c as f32 * f).round().clamp(0.0, 255.0) as u8;
        }
    }
    rgb
}

fn stretch_contrast(mut rgb: RgbImage, factor: f32) -> RgbImage {
    let pixels = (rgb.width() as usize * rgb.height() as usize).max(1) as f32;
    let mut mean = [0.0f32; 3];
    for pixel in rgb.pixels() {
        for (m, c) in mean.iter_mut().zip(pixel.0) {
            *m += c as f32;
        }
    }
    for m in mean.iter_mut() {
        *m /= pixels;
    }
    for pixel in rgb.pixels_mut() {
        for (c, m) in pixel.0.iter_mut().zip(mean) {
            *c = ((*c as f32 - m) * factor + m).round().clamp(0.0, 255.0) as u8;
        }
    }
    rgb
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClassAugmentReport {
    pub class: String,
    pub before: usize,
    pub generated: usize,
    pub source_failures: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AugmentReport {
    pub target: usize,
    pub classes: Vec<ClassAugmentReport>,
}

impl AugmentReport {
    pub fn generated(&self) -> usize {
        self.classes.iter().map(|c| c.generated).sum()
    }
}

/// Top up every class folder under `root` to `target` images.
///
/// `seed` makes the run reproducible; `None` seeds from entropy.
pub fn augment_dataset(
    root: &Path,
    target: usize,
    seed: Option<u64>,
    mut on_class: impl FnMut(&ClassAugmentReport),
) -> Result<AugmentReport> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut report = AugmentReport {
        target,
        classes: Vec::new(),
    };
    for (class, dir) in class_dirs(root)? {
        let class_report = augment_class_dir(&dir, target, &mut rng)
            .with_context(|| format!("failed to augment class '{}'", class))?;
        let class_report = ClassAugmentReport {
            class,
            ..class_report
        };
        on_class(&class_report);
        report.classes.push(class_report);
    }
    Ok(report)
}

/// Top up one folder. Leaves it untouched when it already holds `target` images.
pub fn augment_class_dir<R: Rng + ?Sized>(
    dir: &Path,
    target: usize,
    rng: &mut R,
) -> Result<ClassAugmentReport> {
    let mut sources = list_images(dir)?;
    let before = sources.len();
    let mut report = ClassAugmentReport {
        class: dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        before,
        ..ClassAugmentReport::default()
    };
    if before >= target {
        log::info!(
            "{}: {} images, target {} already met",
            dir.display(),
            before,
            target
        );
        return Ok(report);
    }

    let needed = target - before;
    log::info!(
        "{}: generating {} images ({} -> {})",
        dir.display(),
        needed,
        before,
        target
    );
    let mut index = 0usize;
    while report.generated < needed {
        let Some(source) = sources.choose(rng).cloned() else {
            return Err(anyhow!(
                "no decodable source images left in {}",
                dir.display()
            ));
        };
        let image = match image::open(&source) {
            Ok(image) => image,
            Err(e) => {
                log::debug!("skipping unreadable source {}: {}", source.display(), e);
                report.source_failures += 1;
                sources.retain(|p| p != &source);
                continue;
            }
        };

        let augmentation = Augmentation::random(rng);
        let out = next_free_name(dir, &source, &mut index);
        augmentation
            .apply(&image)
            .save(&out)
            .with_context(|| format!("failed to write {}", out.display()))?;
        report.generated += 1;
        if report.generated % 500 == 0 {
            log::info!("{}: {}/{} generated", dir.display(), report.generated, needed);
        }
    }
    Ok(report)
}

fn next_free_name(dir: &Path, source: &Path, index: &mut usize) -> PathBuf {
    let original = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    loop {
        let candidate = dir.join(format!("{}{:06}_{}", AUGMENTED_PREFIX, *index, original));
        *index += 1;
        if !candidate.exists() {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 100]))
    }

    #[test]
    fn rotations_swap_dimensions() {
        let image = DynamicImage::ImageRgb8(gradient(6, 4));
        assert_eq!(Augmentation::Rotate90.apply(&image).dimensions(), (4, 6));
        assert_eq!(Augmentation::Rotate180.apply(&image).dimensions(), (6, 4));
        assert_eq!(
            Augmentation::FlipHorizontal.apply(&image).get_pixel(0, 0),
            gradient(6, 4).get_pixel(5, 0)
        );
    }

    #[test]
    fn brightness_clamps_without_hue_shift() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([200, 100, 50])));
        let out = Augmentation::Brightness(1.5).apply(&image);
        assert_eq!(out.get_pixel(0, 0).0, [255, 128, 64]);

        let dark = Augmentation::Brightness(0.5).apply(&image);
        assert_eq!(dark.get_pixel(1, 1).0, [100, 50, 25]);
    }

    #[test]
    fn contrast_keeps_flat_images_flat() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([90, 90, 90])));
        let out = Augmentation::Contrast(1.4).apply(&image);
        assert!(out.pixels().all(|p| p.0 == [90, 90, 90]));
    }

    #[test]
    fn tops_up_to_target_and_leaves_full_folders_alone() {
        let root = tempfile::tempdir().unwrap();
        for (class, count) in [("closed", 3usize), ("open", 6)] {
            let dir = root.path().join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                gradient(8, 8)
                    .save(dir.join(format!("{}_{}.png", class, i)))
                    .unwrap();
            }
        }
        std::fs::write(root.path().join("closed").join("broken.png"), b"nope").unwrap();

        let mut finished = Vec::new();
        let report =
            augment_dataset(root.path(), 6, Some(7), |c| finished.push(c.class.clone())).unwrap();
        assert_eq!(finished, vec!["closed".to_string(), "open".to_string()]);

        let closed = &report.classes[0];
        assert_eq!(closed.class, "closed");
        assert_eq!(closed.before, 4);
        assert_eq!(closed.generated, 2);
        assert_eq!(report.classes[1].generated, 0);
        assert_eq!(list_images(&root.path().join("closed")).unwrap().len(), 6);
        assert_eq!(list_images(&root.path().join("open")).unwrap().len(), 6);

        let generated: Vec<_> = list_images(&root.path().join("closed"))
            .unwrap()
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(AUGMENTED_PREFIX))
                    .unwrap_or(false)
            })
            .collect();
        assert_eq!(generated.len(), 2);
    }
}
