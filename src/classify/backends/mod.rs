pub mod cnn;
pub mod fallback;

pub use cnn::CnnClassifier;
pub use fallback::FallbackClassifier;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::ClassifierInferenceError;
use crate::Component;

/// Pull the single probability out of a forward pass over one image.
pub(crate) fn single_probability<B: Backend>(
    component: Component,
    output: Tensor<B, 2>,
) -> Result<f32, ClassifierInferenceError> {
    let dims = output.dims();
    if dims != [1, 1] {
        return Err(ClassifierInferenceError::new(
            component,
            format!("expected output shape [1, 1], got {:?}", dims),
        ));
    }
    let values = output
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ClassifierInferenceError::new(component, format!("{:?}", e)))?;
    values
        .first()
        .copied()
        .ok_or_else(|| ClassifierInferenceError::new(component, "model produced no outputs"))
}
