use burn::tensor::backend::Backend;

use crate::classify::classifier::{ComponentClassifier, Provenance};
use crate::classify::model::FallbackHead;
use crate::error::ClassifierInferenceError;
use crate::preprocess::PreprocessedImage;
use crate::{Component, InferenceBackend};

type Device = <InferenceBackend as Backend>::Device;

/// Untrained stand-in used when a component has no usable artifact.
///
/// Output is near-arbitrary. It exists so the registry always holds one classifier
/// per component; callers tell it apart through `Provenance::Fallback`.
pub struct FallbackClassifier {
    component: Component,
    head: FallbackHead<InferenceBackend>,
    device: Device,
}

impl FallbackClassifier {
    pub fn new(component: Component) -> Self {
        let device = Device::default();
        Self {
            component,
            head: FallbackHead::new(&device),
            device,
        }
    }
}

impl ComponentClassifier for FallbackClassifier {
    fn component(&self) -> Component {
        self.component
    }

    fn provenance(&self) -> Provenance {
        Provenance::Fallback
    }

    fn input_size(&self) -> Option<u32> {
        None
    }

    fn open_probability(
        &self,
        input: &PreprocessedImage,
    ) -> Result<f32, ClassifierInferenceError> {
        let tensor = input.to_tensor::<InferenceBackend>(&self.device);
        super::single_probability(self.component, self.head.forward(tensor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn fallback_answers_at_any_size_and_is_tagged() {
        let fallback = FallbackClassifier::new(Component::RearRight);
        assert_eq!(fallback.provenance(), Provenance::Fallback);
        assert_eq!(fallback.input_size(), None);

        for side in [16, 256] {
            let image = RgbImage::from_pixel(side, side, Rgb([255, 255, 255]));
            let input = PreprocessedImage::from_rgb(&image);
            let p = fallback.open_probability(&input).unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
    }
}
