mod backends;
mod classifier;
mod model;
mod registry;
mod result;

pub use backends::{CnnClassifier, FallbackClassifier};
pub use classifier::{ComponentClassifier, Provenance};
pub use model::{BinaryCnn, BinaryCnnConfig, FallbackHead, MIN_IMAGE_SIZE};
pub use registry::{ClassifierRegistry, ComponentLoadState, LoadSummary, RegistryBuilder};
pub use result::{Prediction, Status, StatusReport, OPEN_THRESHOLD};
