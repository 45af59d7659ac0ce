//! Typed failures for the serving path.
//!
//! Offline tooling (training, augmentation, config) reports through `anyhow`.
//! The serving path needs typed errors so that load and inference failures can be
//! folded into sentinel report entries instead of aborting a request.

use std::path::PathBuf;

use thiserror::Error;

use crate::Component;

/// The input could not be turned into a 3-channel raster.
#[derive(Debug, Error)]
pub enum InvalidImageError {
    #[error("image payload is empty")]
    Empty,
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to read image {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
}

/// Why a persisted classifier could not be used.
#[derive(Debug, Error)]
pub enum LoadFailure {
    #[error("no artifact at {}", path.display())]
    Missing { path: PathBuf },
    #[error("unreadable manifest: {0}")]
    Manifest(String),
    #[error("weights digest mismatch (manifest={expected}, file={actual})")]
    Corrupt { expected: String, actual: String },
    #[error("incompatible artifact: {0}")]
    Incompatible(String),
    #[error("failed to decode weights: {0}")]
    Weights(String),
}

/// A named classifier's persisted parameters are missing or unusable.
///
/// Recovered at startup by substituting the untrained fallback.
#[derive(Debug, Error)]
#[error("classifier '{component}' failed to load: {kind}")]
pub struct ClassifierLoadError {
    pub component: Component,
    #[source]
    pub kind: LoadFailure,
}

impl ClassifierLoadError {
    pub fn new(component: Component, kind: LoadFailure) -> Self {
        Self { component, kind }
    }

    /// True when the artifact simply was not there.
    pub fn is_missing(&self) -> bool {
        matches!(self.kind, LoadFailure::Missing { .. })
    }
}

/// A single classifier failed while predicting.
///
/// Recovered per component by emitting the `unknown` sentinel.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("classifier '{component}' failed during inference: {reason}")]
pub struct ClassifierInferenceError {
    pub component: Component,
    pub reason: String,
}

impl ClassifierInferenceError {
    pub fn new(component: Component, reason: impl Into<String>) -> Self {
        Self {
            component,
            reason: reason.into(),
        }
    }
}
