//! Multi-component inference.
//!
//! One image is preprocessed once and handed to every registered classifier in
//! component order. Each classifier yields a typed result; a failure only affects
//! its own entry, which becomes the `unknown` / `0.0` sentinel.
//!
//! There is no cross-component consistency rule: every entry stands on its own.

use std::collections::BTreeMap;
use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::classify::{ClassifierRegistry, Prediction, Provenance, Status, StatusReport};
use crate::error::{ClassifierInferenceError, InvalidImageError};
use crate::preprocess::{PreprocessedImage, Preprocessor};
use crate::Component;

/// What the report shows for components served by the untrained fallback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Report the fallback's (meaningless) prediction as-is.
    #[default]
    Predict,
    /// Report `unknown` / `0.0`; the raw output stays available in the `Evaluation`.
    ReportUnknown,
}

/// Result of one classifier on one image.
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentOutcome {
    pub provenance: Provenance,
    /// Raw open-probability, or why the classifier could not produce one.
    pub raw: Result<f32, ClassifierInferenceError>,
}

impl ComponentOutcome {
    pub fn prediction(&self) -> Prediction {
        self.raw
            .as_ref()
            .ok()
            .and_then(|p| Prediction::from_probability(*p))
            .unwrap_or(Prediction::UNKNOWN)
    }
}

/// Serializable view of a `ComponentOutcome`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetailedEntry {
    pub status: Status,
    pub conf: f32,
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// All component outcomes for one image.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    outcomes: BTreeMap<Component, ComponentOutcome>,
    policy: FallbackPolicy,
}

impl Evaluation {
    pub fn get(&self, component: Component) -> Option<&ComponentOutcome> {
        self.outcomes.get(&component)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Component, &ComponentOutcome)> {
        self.outcomes.iter().map(|(c, o)| (*c, o))
    }

    pub fn failures(&self) -> Vec<&ClassifierInferenceError> {
        self.outcomes
            .values()
            .filter_map(|o| o.raw.as_ref().err())
            .collect()
    }

    /// The Status Report: one entry per registered component.
    pub fn report(&self) -> StatusReport {
        StatusReport::from_entries(
            self.outcomes
                .iter()
                .map(|(c, o)| (*c, self.reported(o)))
                .collect(),
        )
    }

    pub fn detailed(&self) -> BTreeMap<Component, DetailedEntry> {
        self.outcomes
            .iter()
            .map(|(c, o)| {
                let prediction = self.reported(o);
                (
                    *c,
                    DetailedEntry {
                        status: prediction.status,
                        conf: prediction.conf,
                        provenance: o.provenance,
                        raw: o.raw.as_ref().ok().copied(),
                        error: o.raw.as_ref().err().map(|e| e.reason.clone()),
                    },
                )
            })
            .collect()
    }

    fn reported(&self, outcome: &ComponentOutcome) -> Prediction {
        if outcome.provenance == Provenance::Fallback
            && self.policy == FallbackPolicy::ReportUnknown
        {
            return Prediction::UNKNOWN;
        }
        outcome.prediction()
    }
}

/// Runs every registered classifier over an image.
#[derive(Clone)]
pub struct Aggregator {
    registry: Arc<ClassifierRegistry>,
    policy: FallbackPolicy,
}

impl Aggregator {
    pub fn new(registry: Arc<ClassifierRegistry>) -> Self {
        Self {
            registry,
            policy: FallbackPolicy::default(),
        }
    }

    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &ClassifierRegistry {
        &self.registry
    }

    pub fn preprocessor(&self) -> Preprocessor {
        self.registry.preprocessor()
    }

    pub fn evaluate(&self, image: &DynamicImage) -> Result<Evaluation, InvalidImageError> {
        let input = self.preprocessor().prepare(image)?;
        Ok(self.evaluate_prepared(&input))
    }

    /// Evaluate an already-preprocessed image. Cannot fail as a whole.
    pub fn evaluate_prepared(&self, input: &PreprocessedImage) -> Evaluation {
        let mut outcomes = BTreeMap::new();
        for component in self.registry.components() {
            let raw = self.registry.open_probability(component, input);
            if let Err(e) = &raw {
                log::error!("{}", e);
            }
            let provenance = self
                .registry
                .provenance_of(component)
                .unwrap_or(Provenance::Fallback);
            outcomes.insert(component, ComponentOutcome { provenance, raw });
        }
        Evaluation {
            outcomes,
            policy: self.policy,
        }
    }

    pub fn report(&self, image: &DynamicImage) -> Result<StatusReport, InvalidImageError> {
        Ok(self.evaluate(image)?.report())
    }

    /// Decode an encoded image and report on it.
    pub fn report_bytes(&self, bytes: &[u8]) -> Result<StatusReport, InvalidImageError> {
        let input = self.preprocessor().prepare_bytes(bytes)?;
        let evaluation = self.evaluate_prepared(&input);
        log::debug!("status report: {:?}", evaluation.report());
        Ok(evaluation.report())
    }
}
