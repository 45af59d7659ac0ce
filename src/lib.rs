//! Panel Watch
//!
//! Open/closed state classification for car body panels.
//!
//! # Architecture
//!
//! One binary classifier is kept per monitored component (hood and the four doors).
//! The crate is organised leaves first:
//!
//! - `preprocess`: decode + resize + scale an image into a fixed `1 x 3 x S x S` tensor
//! - `classify`: the CNN architecture, the untrained fallback, and the registry that
//!   owns one classifier per component with an explicit provenance tag
//! - `train`: offline fitting with a seeded split, early stopping and diagnostics
//! - `aggregate`: runs every registered classifier on one image and builds a `StatusReport`
//! - `artifact`: persisted manifest + weights per component
//! - `dataset` / `augment`: labeled directory loading and offline top-up
//!
//! Every `StatusReport` carries exactly one entry per component. Failures degrade to
//! the `unknown` sentinel with confidence `0.0`; they never drop a key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod aggregate;
pub mod artifact;
pub mod augment;
pub mod classify;
pub mod config;
pub mod dataset;
pub mod error;
pub mod preprocess;
pub mod train;

pub use aggregate::{Aggregator, ComponentOutcome, Evaluation, FallbackPolicy};
pub use artifact::{ArtifactManifest, TrainingSummary};
pub use classify::{
    BinaryCnn, BinaryCnnConfig, ClassifierRegistry, CnnClassifier, ComponentClassifier,
    FallbackClassifier, LoadSummary, Prediction, Provenance, RegistryBuilder, Status,
    StatusReport,
};
pub use config::PanelWatchConfig;
pub use error::{ClassifierInferenceError, ClassifierLoadError, InvalidImageError, LoadFailure};
pub use preprocess::{PreprocessedImage, Preprocessor};

/// CPU backend used for serving and for reading persisted weights.
pub type InferenceBackend = burn::backend::NdArray<f32>;

/// Autodiff wrapper used by the trainer.
pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;

/// Serving resolution used when nothing else is configured.
pub const DEFAULT_IMAGE_SIZE: u32 = 256;

/// Class names in label order. Index 0 is `closed`, index 1 is `open`.
pub const CLASS_NAMES: [&str; 2] = ["closed", "open"];

// -------------------- Components --------------------

/// A monitored car body component.
///
/// The set is fixed at build time; declaration order is the report order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Hood,
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Hood,
        Component::FrontLeft,
        Component::FrontRight,
        Component::RearLeft,
        Component::RearRight,
    ];

    /// Stable identifier used for report keys and artifact file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Hood => "hood",
            Component::FrontLeft => "front_left",
            Component::FrontRight => "front_right",
            Component::RearLeft => "rear_left",
            Component::RearRight => "rear_right",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Component::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown component '{}' (expected one of: hood, front_left, front_right, rear_left, rear_right)",
                    s
                )
            })
    }
}
