use serde::{Deserialize, Serialize};

use crate::error::ClassifierInferenceError;
use crate::preprocess::PreprocessedImage;
use crate::Component;

/// Where a registered classifier's parameters came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Parameters loaded from a persisted training artifact.
    Trained,
    /// Untrained stand-in; predictions carry no meaning.
    Fallback,
}

/// Per-component binary classifier.
///
/// Implementations are pure functions of their parameters and the input: the same
/// input must yield the same probability for the lifetime of the instance.
pub trait ComponentClassifier: Send {
    /// Component this classifier answers for.
    fn component(&self) -> Component;

    fn provenance(&self) -> Provenance;

    /// Square side length the classifier was built for. `None` accepts any size.
    fn input_size(&self) -> Option<u32>;

    /// Probability that the component is open, in `[0, 1]`.
    fn open_probability(&self, input: &PreprocessedImage)
        -> Result<f32, ClassifierInferenceError>;

}
