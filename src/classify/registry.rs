use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::classify::backends::{CnnClassifier, FallbackClassifier};
use crate::classify::classifier::{ComponentClassifier, Provenance};
use crate::error::{ClassifierInferenceError, ClassifierLoadError, LoadFailure};
use crate::preprocess::{PreprocessedImage, Preprocessor};
use crate::Component;

struct RegistryEntry {
    classifier: Mutex<Box<dyn ComponentClassifier>>,
    provenance: Provenance,
    load_error: Option<String>,
}

/// One classifier per component, fixed after construction.
///
/// Classifiers sit behind a `Mutex` so the registry can be shared across threads
/// through `Arc`; nothing mutates them after `build`.
pub struct ClassifierRegistry {
    entries: BTreeMap<Component, RegistryEntry>,
    preprocessor: Preprocessor,
}

impl ClassifierRegistry {
    /// Load every component's artifact from `model_dir`.
    ///
    /// Never fails: a missing or unusable artifact is logged and replaced by the
    /// untrained fallback, and the failure is kept in `load_summary`.
    pub fn load(model_dir: &Path, serving_size: u32) -> Self {
        let mut builder = Self::builder(serving_size);
        for component in Component::ALL {
            match CnnClassifier::load(model_dir, component, serving_size) {
                Ok(classifier) => {
                    log::info!(
                        "classifier {} loaded from {}",
                        component,
                        model_dir.display()
                    );
                    builder = builder.with_classifier(classifier);
                }
                Err(e) if e.is_missing() => {
                    log::warn!("{}; using untrained fallback", e);
                    builder = builder.with_load_error(e);
                }
                Err(e) => {
                    log::warn!("{}; using untrained fallback", e);
                    builder = builder.with_load_error(e);
                }
            }
        }
        let registry = builder.build();
        let summary = registry.load_summary();
        log::info!(
            "classifier registry ready: {}/{} trained, serving at {}x{}",
            summary.trained_count(),
            Component::ALL.len(),
            serving_size,
            serving_size
        );
        registry
    }

    pub fn builder(serving_size: u32) -> RegistryBuilder {
        RegistryBuilder::new(serving_size)
    }

    /// Preprocessor at the serving resolution shared by all classifiers.
    pub fn preprocessor(&self) -> Preprocessor {
        self.preprocessor
    }

    pub fn components(&self) -> impl Iterator<Item = Component> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn provenance_of(&self, component: Component) -> Option<Provenance> {
        self.entries.get(&component).map(|e| e.provenance)
    }

    pub fn provenance(&self) -> BTreeMap<Component, Provenance> {
        self.entries
            .iter()
            .map(|(c, e)| (*c, e.provenance))
            .collect()
    }

    pub fn load_summary(&self) -> LoadSummary {
        LoadSummary {
            image_size: self.preprocessor.size(),
            components: self
                .entries
                .iter()
                .map(|(c, e)| {
                    (
                        *c,
                        ComponentLoadState {
                            provenance: e.provenance,
                            error: e.load_error.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Run one component's classifier and return its raw open-probability.
    ///
    /// A panic inside the classifier (shape errors in the numeric backend surface this
    /// way) becomes an inference error for this component only.
    pub fn open_probability(
        &self,
        component: Component,
        input: &PreprocessedImage,
    ) -> Result<f32, ClassifierInferenceError> {
        let entry = self.entries.get(&component).ok_or_else(|| {
            ClassifierInferenceError::new(component, "component not registered")
        })?;
        let guard = entry
            .classifier
            .lock()
            .map_err(|_| ClassifierInferenceError::new(component, "classifier lock poisoned"))?;
        let p = catch_unwind(AssertUnwindSafe(|| guard.open_probability(input)))
            .map_err(|panic| ClassifierInferenceError::new(component, panic_reason(&*panic)))??;
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(ClassifierInferenceError::new(
                component,
                format!("probability {} outside [0, 1]", p),
            ));
        }
        Ok(p)
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "classifier panicked".to_string())
}

/// Collects classifiers, then fills every unassigned component with a fallback.
pub struct RegistryBuilder {
    serving_size: u32,
    classifiers: BTreeMap<Component, Box<dyn ComponentClassifier>>,
    load_errors: BTreeMap<Component, String>,
}

impl RegistryBuilder {
    pub fn new(serving_size: u32) -> Self {
        Self {
            serving_size,
            classifiers: BTreeMap::new(),
            load_errors: BTreeMap::new(),
        }
    }

    /// Register a classifier under its own component, replacing any earlier one.
    pub fn with_classifier<C: ComponentClassifier + 'static>(mut self, classifier: C) -> Self {
        let component = classifier.component();
        self.load_errors.remove(&component);
        self.classifiers.insert(component, Box::new(classifier));
        self
    }

    /// Record a load failure; the component will be served by the fallback.
    pub fn with_load_error(mut self, error: ClassifierLoadError) -> Self {
        self.classifiers.remove(&error.component);
        self.load_errors.insert(error.component, error.to_string());
        self
    }

    pub fn build(mut self) -> ClassifierRegistry {
        let mut entries = BTreeMap::new();
        for component in Component::ALL {
            let (classifier, load_error): (Box<dyn ComponentClassifier>, Option<String>) =
                match self.classifiers.remove(&component) {
                    Some(classifier) => match classifier.input_size() {
                        Some(size) if size != self.serving_size => {
                            let error = ClassifierLoadError::new(
                                component,
                                LoadFailure::Incompatible(format!(
                                    "classifier expects {}x{} input, registry serves {}x{}",
                                    size, size, self.serving_size, self.serving_size
                                )),
                            );
                            log::warn!("{}; using untrained fallback", error);
                            (
                                Box::new(FallbackClassifier::new(component)),
                                Some(error.to_string()),
                            )
                        }
                        _ => (classifier, None),
                    },
                    None => (
                        Box::new(FallbackClassifier::new(component)),
                        self.load_errors.remove(&component),
                    ),
                };
            let provenance = classifier.provenance();
            entries.insert(
                component,
                RegistryEntry {
                    classifier: Mutex::new(classifier),
                    provenance,
                    load_error,
                },
            );
        }
        ClassifierRegistry {
            entries,
            preprocessor: Preprocessor::new(self.serving_size),
        }
    }
}

/// Per-component startup outcome.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComponentLoadState {
    pub provenance: Provenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Which components are backed by trained parameters and which by the fallback.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoadSummary {
    pub image_size: u32,
    pub components: BTreeMap<Component, ComponentLoadState>,
}

impl LoadSummary {
    pub fn trained_count(&self) -> usize {
        self.components
            .values()
            .filter(|s| s.provenance == Provenance::Trained)
            .count()
    }

    pub fn fallback_components(&self) -> Vec<Component> {
        self.components
            .iter()
            .filter(|(_, s)| s.provenance == Provenance::Fallback)
            .map(|(c, _)| *c)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::model::BinaryCnnConfig;
    use crate::InferenceBackend;
    use image::RgbImage;

    #[test]
    fn empty_builder_fills_every_component_with_fallback() {
        let registry = ClassifierRegistry::builder(64).build();

        assert_eq!(registry.len(), Component::ALL.len());
        assert_eq!(
            registry.components().collect::<Vec<_>>(),
            Component::ALL.to_vec()
        );
        assert!(registry
            .provenance()
            .values()
            .all(|p| *p == Provenance::Fallback));
    }

    #[test]
    fn load_from_empty_dir_reports_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ClassifierRegistry::load(dir.path(), 64);
        let summary = registry.load_summary();

        assert_eq!(summary.trained_count(), 0);
        assert_eq!(summary.fallback_components(), Component::ALL.to_vec());
        for state in summary.components.values() {
            assert!(state.error.as_deref().unwrap_or("").contains("no artifact"));
        }
    }

    #[test]
    fn size_mismatch_is_demoted_to_fallback() {
        let config = BinaryCnnConfig::new().with_image_size(32);
        let model = config.init::<InferenceBackend>(&Default::default());
        let registry = ClassifierRegistry::builder(64)
            .with_classifier(CnnClassifier::new(Component::Hood, model, config))
            .build();

        assert_eq!(
            registry.provenance_of(Component::Hood),
            Some(Provenance::Fallback)
        );
        let summary = registry.load_summary();
        assert!(summary.components[&Component::Hood]
            .error
            .as_deref()
            .unwrap()
            .contains("incompatible"));
    }

    #[test]
    fn trained_classifier_keeps_its_provenance() {
        let config = BinaryCnnConfig::new().with_image_size(32);
        let model = config.init::<InferenceBackend>(&Default::default());
        let registry = ClassifierRegistry::builder(32)
            .with_classifier(CnnClassifier::new(Component::FrontLeft, model, config))
            .build();

        assert_eq!(
            registry.provenance_of(Component::FrontLeft),
            Some(Provenance::Trained)
        );
        assert_eq!(registry.load_summary().trained_count(), 1);

        let input = PreprocessedImage::from_rgb(&RgbImage::new(32, 32));
        let p = registry
            .open_probability(Component::FrontLeft, &input)
            .unwrap();
        assert!((0.0..=1.0).contains(&p));
    }
}
