use std::path::Path;

use burn::tensor::backend::Backend;

use crate::artifact;
use crate::classify::classifier::{ComponentClassifier, Provenance};
use crate::classify::model::{BinaryCnn, BinaryCnnConfig};
use crate::error::{ClassifierInferenceError, ClassifierLoadError};
use crate::preprocess::PreprocessedImage;
use crate::{Component, InferenceBackend};

type Device = <InferenceBackend as Backend>::Device;

/// Trained CNN classifier for one component.
///
/// Parameters are fixed after construction; there is no online update.
pub struct CnnClassifier {
    component: Component,
    model: BinaryCnn<InferenceBackend>,
    config: BinaryCnnConfig,
    device: Device,
}

impl CnnClassifier {
    /// Wrap an in-memory model (e.g. straight out of the trainer).
    pub fn new(
        component: Component,
        model: BinaryCnn<InferenceBackend>,
        config: BinaryCnnConfig,
    ) -> Self {
        Self {
            component,
            model,
            config,
            device: Device::default(),
        }
    }

    /// Load the persisted artifact for `component` from `model_dir`.
    ///
    /// The artifact must have been trained at `serving_size`.
    pub fn load(
        model_dir: &Path,
        component: Component,
        serving_size: u32,
    ) -> Result<Self, ClassifierLoadError> {
        let device = Device::default();
        let (model, manifest) = artifact::load(model_dir, component, serving_size, &device)?;
        Ok(Self {
            component,
            model,
            config: manifest.model,
            device,
        })
    }

    pub fn model(&self) -> &BinaryCnn<InferenceBackend> {
        &self.model
    }
}

impl ComponentClassifier for CnnClassifier {
    fn component(&self) -> Component {
        self.component
    }

    fn provenance(&self) -> Provenance {
        Provenance::Trained
    }

    fn input_size(&self) -> Option<u32> {
        Some(self.config.image_size as u32)
    }

    fn open_probability(
        &self,
        input: &PreprocessedImage,
    ) -> Result<f32, ClassifierInferenceError> {
        if input.size() as usize != self.config.image_size {
            return Err(ClassifierInferenceError::new(
                self.component,
                format!(
                    "input size {}x{} does not match model input {}x{}",
                    input.size(),
                    input.size(),
                    self.config.image_size,
                    self.config.image_size
                ),
            ));
        }
        let tensor = input.to_tensor::<InferenceBackend>(&self.device);
        super::single_probability(self.component, self.model.forward(tensor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn classifier(size: usize) -> CnnClassifier {
        let config = BinaryCnnConfig::new().with_image_size(size);
        let model = config.init::<InferenceBackend>(&Default::default());
        CnnClassifier::new(Component::Hood, model, config)
    }

    #[test]
    fn predicts_probability_in_unit_interval() {
        let classifier = classifier(32);
        let image = RgbImage::from_pixel(32, 32, Rgb([90, 120, 200]));
        let input = PreprocessedImage::from_rgb(&image);

        let p = classifier.open_probability(&input).unwrap();
        assert!((0.0..=1.0).contains(&p));
        assert_eq!(classifier.provenance(), Provenance::Trained);
        assert_eq!(classifier.input_size(), Some(32));
    }

    #[test]
    fn rejects_input_of_wrong_resolution() {
        let classifier = classifier(32);
        let input = PreprocessedImage::from_rgb(&RgbImage::new(24, 24));

        let err = classifier.open_probability(&input).unwrap_err();
        assert_eq!(err.component, Component::Hood);
        assert!(err.reason.contains("does not match"));
    }

    #[test]
    fn repeated_calls_are_identical() {
        let classifier = classifier(32);
        let input = PreprocessedImage::from_rgb(&RgbImage::from_fn(32, 32, |x, y| {
            Rgb([(x * 7) as u8, (y * 5) as u8, 33])
        }));
        let first = classifier.open_probability(&input).unwrap();
        let second = classifier.open_probability(&input).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }
}
