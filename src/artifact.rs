//! Persisted classifier artifacts.
//!
//! Each component is stored as two files in the model directory:
//! - `<component>.json`: manifest (architecture config, channel order, class names,
//!   weights digest, training summary)
//! - `<component>.mpk`: burn named-MessagePack record at full precision
//!
//! The manifest carries the architecture and the record carries the weights, so a
//! load rebuilds the exact network without any out-of-band knowledge.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::{BinaryCnn, BinaryCnnConfig};
use crate::error::{ClassifierLoadError, LoadFailure};
use crate::preprocess::CHANNEL_ORDER;
use crate::{Component, InferenceBackend, CLASS_NAMES};

pub const FORMAT_VERSION: u32 = 1;

const MANIFEST_EXTENSION: &str = "json";
const WEIGHTS_EXTENSION: &str = "mpk";

/// What the trainer knew when it wrote the artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_val_accuracy: f64,
    pub stop_reason: String,
    pub seed: u64,
    pub train_samples: usize,
    pub val_samples: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format_version: u32,
    pub component: Component,
    pub model: BinaryCnnConfig,
    pub channel_order: String,
    pub class_names: Vec<String>,
    pub weights_file: String,
    pub weights_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training: Option<TrainingSummary>,
}

pub fn manifest_path(model_dir: &Path, component: Component) -> PathBuf {
    model_dir
        .join(component.as_str())
        .with_extension(MANIFEST_EXTENSION)
}

pub fn weights_path(model_dir: &Path, component: Component) -> PathBuf {
    model_dir
        .join(component.as_str())
        .with_extension(WEIGHTS_EXTENSION)
}

/// Write weights first, then the manifest that vouches for them.
///
/// Refuses a config that `load` would reject as incompatible.
pub fn save(
    model_dir: &Path,
    component: Component,
    model: &BinaryCnn<InferenceBackend>,
    config: &BinaryCnnConfig,
    training: Option<TrainingSummary>,
) -> Result<ArtifactManifest> {
    config.validate()?;
    std::fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create model dir {}", model_dir.display()))?;

    let weights = weights_path(model_dir, component);
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(weights.clone(), &recorder)
        .map_err(|e| anyhow!("failed to write weights {}: {:?}", weights.display(), e))?;

    let weights_sha256 = sha256_file(&weights)
        .with_context(|| format!("failed to hash weights {}", weights.display()))?;

    let manifest = ArtifactManifest {
        format_version: FORMAT_VERSION,
        component,
        model: config.clone(),
        channel_order: CHANNEL_ORDER.to_string(),
        class_names: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        weights_file: format!("{}.{}", component.as_str(), WEIGHTS_EXTENSION),
        weights_sha256,
        training,
    };
    let path = manifest_path(model_dir, component);
    let json = serde_json::to_vec_pretty(&manifest)?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write manifest {}", path.display()))?;
    log::info!(
        "artifact for {} written to {} (sha256={})",
        component,
        path.display(),
        manifest.weights_sha256
    );
    Ok(manifest)
}

/// Load and verify the artifact for `component`.
pub fn load(
    model_dir: &Path,
    component: Component,
    serving_size: u32,
    device: &<InferenceBackend as Backend>::Device,
) -> Result<(BinaryCnn<InferenceBackend>, ArtifactManifest), ClassifierLoadError> {
    let fail = |kind| ClassifierLoadError::new(component, kind);

    let path = manifest_path(model_dir, component);
    if !path.is_file() {
        return Err(fail(LoadFailure::Missing { path }));
    }
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| fail(LoadFailure::Manifest(format!("{}: {}", path.display(), e))))?;
    let manifest: ArtifactManifest = serde_json::from_str(&raw)
        .map_err(|e| fail(LoadFailure::Manifest(format!("{}: {}", path.display(), e))))?;

    check_compatible(&manifest, component, serving_size)
        .map_err(|reason| fail(LoadFailure::Incompatible(reason)))?;

    let weights = model_dir.join(&manifest.weights_file);
    if !weights.is_file() {
        return Err(fail(LoadFailure::Missing { path: weights }));
    }
    let actual = sha256_file(&weights)
        .map_err(|e| fail(LoadFailure::Weights(format!("{}: {}", weights.display(), e))))?;
    if actual != manifest.weights_sha256 {
        return Err(fail(LoadFailure::Corrupt {
            expected: manifest.weights_sha256.clone(),
            actual,
        }));
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let model = manifest
        .model
        .init::<InferenceBackend>(device)
        .load_file(weights, &recorder, device)
        .map_err(|e| fail(LoadFailure::Weights(format!("{:?}", e))))?;

    Ok((model, manifest))
}

fn check_compatible(
    manifest: &ArtifactManifest,
    component: Component,
    serving_size: u32,
) -> std::result::Result<(), String> {
    if manifest.format_version != FORMAT_VERSION {
        return Err(format!(
            "format version {} (expected {})",
            manifest.format_version, FORMAT_VERSION
        ));
    }
    if manifest.component != component {
        return Err(format!(
            "manifest is for '{}', not '{}'",
            manifest.component, component
        ));
    }
    if manifest.channel_order != CHANNEL_ORDER {
        return Err(format!(
            "channel order '{}' (expected '{}')",
            manifest.channel_order, CHANNEL_ORDER
        ));
    }
    if manifest.class_names != CLASS_NAMES {
        return Err(format!(
            "class names {:?} (expected {:?})",
            manifest.class_names, CLASS_NAMES
        ));
    }
    if manifest.model.image_size != serving_size as usize {
        return Err(format!(
            "trained at {}x{}, serving at {}x{}",
            manifest.model.image_size, manifest.model.image_size, serving_size, serving_size
        ));
    }
    let file_name = Path::new(&manifest.weights_file).file_name();
    if file_name.and_then(|n| n.to_str()) != Some(manifest.weights_file.as_str()) {
        return Err(format!(
            "weights file '{}' must be a bare file name",
            manifest.weights_file
        ));
    }
    manifest.model.validate().map_err(|e| e.to_string())
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_model() -> (BinaryCnn<InferenceBackend>, BinaryCnnConfig) {
        let config = BinaryCnnConfig::new().with_image_size(24);
        (config.init(&Default::default()), config)
    }

    #[test]
    fn save_writes_manifest_and_weights() {
        let dir = tempfile::tempdir().unwrap();
        let (model, config) = small_model();
        let manifest = save(dir.path(), Component::Hood, &model, &config, None).unwrap();

        assert!(manifest_path(dir.path(), Component::Hood).is_file());
        assert!(weights_path(dir.path(), Component::Hood).is_file());
        assert_eq!(manifest.weights_file, "hood.mpk");
        assert_eq!(manifest.weights_sha256.len(), 64);
    }

    #[test]
    fn load_rejects_tampered_weights() {
        let dir = tempfile::tempdir().unwrap();
        let (model, config) = small_model();
        save(dir.path(), Component::Hood, &model, &config, None).unwrap();

        let weights = weights_path(dir.path(), Component::Hood);
        let mut bytes = std::fs::read(&weights).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&weights, bytes).unwrap();

        let err = load(dir.path(), Component::Hood, 24, &Default::default()).unwrap_err();
        assert!(matches!(err.kind, LoadFailure::Corrupt { .. }));
    }

    #[test]
    fn load_rejects_resolution_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (model, config) = small_model();
        save(dir.path(), Component::Hood, &model, &config, None).unwrap();

        let err = load(dir.path(), Component::Hood, 256, &Default::default()).unwrap_err();
        assert!(matches!(err.kind, LoadFailure::Incompatible(_)));
    }

    #[test]
    fn load_rejects_manifest_for_other_component() {
        let dir = tempfile::tempdir().unwrap();
        let (model, config) = small_model();
        save(dir.path(), Component::Hood, &model, &config, None).unwrap();
        std::fs::copy(
            manifest_path(dir.path(), Component::Hood),
            manifest_path(dir.path(), Component::RearLeft),
        )
        .unwrap();

        let err = load(dir.path(), Component::RearLeft, 24, &Default::default()).unwrap_err();
        assert!(matches!(err.kind, LoadFailure::Incompatible(_)));
    }

    fn rewrite_model_section(
        dir: &Path,
        component: Component,
        edit: impl Fn(&mut serde_json::Value),
    ) {
        let path = manifest_path(dir, component);
        let mut json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        edit(&mut json["model"]);
        std::fs::write(&path, serde_json::to_vec_pretty(&json).unwrap()).unwrap();
    }

    #[test]
    fn load_rejects_foreign_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let (model, config) = small_model();
        save(dir.path(), Component::Hood, &model, &config, None).unwrap();
        rewrite_model_section(dir.path(), Component::Hood, |m| {
            m["channels"] = serde_json::json!([1, 1, 1]);
            m["hidden"] = serde_json::json!(1);
            m["dropout"] = serde_json::json!(0.0);
        });

        let err = load(dir.path(), Component::Hood, 24, &Default::default()).unwrap_err();
        assert!(matches!(err.kind, LoadFailure::Incompatible(_)), "{}", err);
    }

    #[test]
    fn oversized_layer_width_is_rejected_before_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let (model, config) = small_model();
        save(dir.path(), Component::Hood, &model, &config, None).unwrap();
        rewrite_model_section(dir.path(), Component::Hood, |m| {
            m["hidden"] = serde_json::json!(1_099_511_627_776u64);
        });

        let err = load(dir.path(), Component::Hood, 24, &Default::default()).unwrap_err();
        assert!(matches!(err.kind, LoadFailure::Incompatible(_)), "{}", err);
    }

    #[test]
    fn save_refuses_non_reference_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let config = BinaryCnnConfig::new()
            .with_image_size(24)
            .with_channels([1, 1, 1])
            .with_hidden(1);
        let model = config.init::<InferenceBackend>(&Default::default());
        assert!(save(dir.path(), Component::Hood, &model, &config, None).is_err());
        assert!(!manifest_path(dir.path(), Component::Hood).exists());
    }

    #[test]
    fn load_reports_garbage_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(manifest_path(dir.path(), Component::Hood), b"{ not json").unwrap();

        let err = load(dir.path(), Component::Hood, 24, &Default::default()).unwrap_err();
        assert!(matches!(err.kind, LoadFailure::Manifest(_)));
    }
}
