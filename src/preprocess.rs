//! Image normalization for classifier input.
//!
//! Every classifier consumes the same layout:
//! - RGB channel order (never BGR)
//! - NCHW, batch of 1 for single-image inference
//! - fixed square side `S`, resized with bilinear filtering (aspect ratio is not kept)
//! - intensities scaled linearly from `0..=255` to `0.0..=1.0`
//!
//! Training goes through the same functions so the two paths cannot drift apart.

use std::path::Path;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

use crate::error::InvalidImageError;

/// Channel order written into artifact manifests and checked at load.
pub const CHANNEL_ORDER: &str = "rgb";

const CHANNELS: usize = 3;

/// Resizes and scales images to a fixed square resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Preprocessor {
    size: u32,
}

impl Preprocessor {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    /// Target side length in pixels.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Decode an encoded image (PNG/JPEG).
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage, InvalidImageError> {
        if bytes.is_empty() {
            return Err(InvalidImageError::Empty);
        }
        Ok(image::load_from_memory(bytes)?)
    }

    /// Read and decode an image file.
    pub fn open(path: &Path) -> Result<DynamicImage, InvalidImageError> {
        let bytes = std::fs::read(path).map_err(|source| InvalidImageError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::decode(&bytes)
    }

    /// Convert to RGB8 and resize to `size x size`.
    pub fn resize(&self, image: &DynamicImage) -> Result<RgbImage, InvalidImageError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(InvalidImageError::ZeroArea { width, height });
        }
        let rgb = image.to_rgb8();
        if width == self.size && height == self.size {
            return Ok(rgb);
        }
        Ok(image::imageops::resize(
            &rgb,
            self.size,
            self.size,
            FilterType::Triangle,
        ))
    }

    /// Full preprocessing for single-image inference.
    pub fn prepare(&self, image: &DynamicImage) -> Result<PreprocessedImage, InvalidImageError> {
        let resized = self.resize(image)?;
        Ok(PreprocessedImage::from_rgb(&resized))
    }

    /// Decode then preprocess.
    pub fn prepare_bytes(&self, bytes: &[u8]) -> Result<PreprocessedImage, InvalidImageError> {
        let image = Self::decode(bytes)?;
        self.prepare(&image)
    }
}

/// A `1 x 3 x S x S` tensor with values in `[0, 1]`.
///
/// Backend independent so one preprocessing pass can feed every classifier.
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessedImage {
    data: Vec<f32>,
    size: u32,
}

impl PreprocessedImage {
    /// Lay out a square RGB image as CHW floats.
    pub fn from_rgb(image: &RgbImage) -> Self {
        let size = image.width();
        let mut data = vec![0.0f32; CHANNELS * (size as usize) * (image.height() as usize)];
        write_chw(image, &mut data);
        Self { data, size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// `[batch, channels, height, width]`.
    pub fn shape(&self) -> [usize; 4] {
        let side = self.size as usize;
        [1, CHANNELS, side, side]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        Tensor::from_data(TensorData::new(self.data.clone(), self.shape()), device)
    }
}

/// Stack already-resized images into one NCHW batch tensor.
pub fn batch_tensor<B: Backend>(images: &[&RgbImage], device: &B::Device) -> Tensor<B, 4> {
    let side = images.first().map(|img| img.width() as usize).unwrap_or(0);
    let per_image = CHANNELS * side * side;
    let mut data = vec![0.0f32; per_image * images.len()];
    for (chunk, image) in data.chunks_mut(per_image.max(1)).zip(images) {
        write_chw(image, chunk);
    }
    Tensor::from_data(
        TensorData::new(data, [images.len(), CHANNELS, side, side]),
        device,
    )
}

/// Mean over all channels of all pixels, in `0..=255`.
pub fn mean_intensity(image: &DynamicImage) -> f64 {
    let rgb = image.to_rgb8();
    let raw = rgb.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    raw.iter().map(|&v| v as f64).sum::<f64>() / raw.len() as f64
}

fn write_chw(image: &RgbImage, out: &mut [f32]) {
    let width = image.width() as usize;
    let plane = width * image.height() as usize;
    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = y as usize * width + x as usize;
        for channel in 0..CHANNELS {
            out[channel * plane + idx] = pixel[channel] as f32 / 255.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode_png(image: &RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn prepare_produces_fixed_shape_in_unit_range() {
        let source = RgbImage::from_fn(640, 480, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 255])
        });
        let pre = Preprocessor::new(64);
        let out = pre.prepare(&DynamicImage::ImageRgb8(source)).unwrap();

        assert_eq!(out.shape(), [1, 3, 64, 64]);
        assert_eq!(out.as_slice().len(), 3 * 64 * 64);
        assert!(out.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn channel_planes_are_rgb_ordered() {
        let source = RgbImage::from_pixel(4, 4, Rgb([255, 0, 51]));
        let out = PreprocessedImage::from_rgb(&source);
        let plane = 16;

        assert_eq!(out.as_slice()[0], 1.0);
        assert_eq!(out.as_slice()[plane], 0.0);
        assert!((out.as_slice()[2 * plane] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn grayscale_input_is_expanded_to_three_channels() {
        let gray = image::GrayImage::from_pixel(10, 10, image::Luma([128]));
        let pre = Preprocessor::new(8);
        let out = pre.prepare(&DynamicImage::ImageLuma8(gray)).unwrap();
        assert_eq!(out.shape(), [1, 3, 8, 8]);
    }

    #[test]
    fn decode_rejects_garbage_and_empty_payloads() {
        assert!(matches!(Preprocessor::decode(&[]), Err(InvalidImageError::Empty)));
        assert!(matches!(
            Preprocessor::decode(b"definitely not an image"),
            Err(InvalidImageError::Decode(_))
        ));
    }

    #[test]
    fn prepare_bytes_matches_prepare() {
        let source = RgbImage::from_fn(30, 20, |x, y| Rgb([x as u8 * 8, y as u8 * 12, 7]));
        let pre = Preprocessor::new(16);
        let from_bytes = pre.prepare_bytes(&encode_png(&source)).unwrap();
        let direct = pre.prepare(&DynamicImage::ImageRgb8(source)).unwrap();
        assert_eq!(from_bytes, direct);
    }

    #[test]
    fn mean_intensity_of_solid_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([9, 9, 9])));
        assert!((mean_intensity(&image) - 9.0).abs() < 1e-9);
    }
}
