use std::path::Path;

use anyhow::{anyhow, Result};
use burn::module::AutodiffModule;
use burn::nn::loss::BinaryCrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::artifact::{self, ArtifactManifest, TrainingSummary};
use crate::classify::{BinaryCnn, BinaryCnnConfig, CnnClassifier};
use crate::dataset::{LabeledImage, SplitDataset};
use crate::preprocess::batch_tensor;
use crate::train::early_stopping::{EarlyStopping, TrainingState};
use crate::train::metrics::ClassificationReport;
use crate::{Component, InferenceBackend, TrainingBackend};

type Device = <TrainingBackend as Backend>::Device;

// Probabilities are clipped before the log when computing validation loss.
const LOSS_EPSILON: f64 = 1e-7;

#[derive(Clone, Debug)]
pub struct TrainerConfig {
    pub model: BinaryCnnConfig,
    pub batch_size: usize,
    pub max_epochs: usize,
    pub patience: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            model: BinaryCnnConfig::new(),
            batch_size: 32,
            max_epochs: 50,
            patience: 4,
            learning_rate: 1e-3,
            seed: 42,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be at least 1"));
        }
        if self.max_epochs == 0 {
            return Err(anyhow!("max_epochs must be at least 1"));
        }
        if self.patience == 0 {
            return Err(anyhow!("patience must be at least 1"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(anyhow!("learning_rate must be positive"));
        }
        Ok(())
    }
}

/// Metrics for one completed epoch.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub improved: bool,
}

/// How the epoch loop ended.
#[derive(Clone, Debug, Serialize)]
pub struct TrainingOutcome {
    pub final_state: TrainingState,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_val_accuracy: f64,
    pub history: Vec<EpochMetrics>,
}

/// Best-epoch parameters plus diagnostics on the validation partition.
pub struct TrainedClassifier {
    pub component: Component,
    pub config: BinaryCnnConfig,
    pub model: BinaryCnn<InferenceBackend>,
    pub outcome: TrainingOutcome,
    pub report: ClassificationReport,
    /// Open-probabilities of the restored model on the validation partition, in order.
    pub validation_probabilities: Vec<f32>,
    seed: u64,
    train_samples: usize,
    val_samples: usize,
}

impl TrainedClassifier {
    pub fn summary(&self) -> TrainingSummary {
        TrainingSummary {
            epochs_run: self.outcome.epochs_run,
            best_epoch: self.outcome.best_epoch,
            best_val_accuracy: self.outcome.best_val_accuracy,
            stop_reason: self.outcome.final_state.label().to_string(),
            seed: self.seed,
            train_samples: self.train_samples,
            val_samples: self.val_samples,
        }
    }

    /// Write the artifact for this component into `model_dir`.
    pub fn persist(&self, model_dir: &Path) -> Result<ArtifactManifest> {
        artifact::save(
            model_dir,
            self.component,
            &self.model,
            &self.config,
            Some(self.summary()),
        )
    }

    pub fn into_classifier(self) -> CnnClassifier {
        CnnClassifier::new(self.component, self.model, self.config)
    }
}

/// Fits one component's classifier with Adam on binary cross-entropy.
pub struct Trainer {
    config: TrainerConfig,
    device: Device,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self {
            config,
            device: Device::default(),
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train until early stopping or the epoch cap, then restore the best epoch.
    ///
    /// `on_epoch` is called after every evaluated epoch.
    pub fn fit(
        &self,
        component: Component,
        dataset: &SplitDataset,
        mut on_epoch: impl FnMut(&EpochMetrics),
    ) -> Result<TrainedClassifier> {
        self.config.validate()?;
        if dataset.image_size as usize != self.config.model.image_size {
            return Err(anyhow!(
                "dataset was prepared at {}x{} but the model expects {}x{}",
                dataset.image_size,
                dataset.image_size,
                self.config.model.image_size,
                self.config.model.image_size
            ));
        }
        if dataset.train.is_empty() || dataset.validation.is_empty() {
            return Err(anyhow!("training and validation partitions must be non-empty"));
        }

        TrainingBackend::seed(self.config.seed);
        let mut model: BinaryCnn<TrainingBackend> = self.config.model.init(&self.device);
        let mut optim = AdamConfig::new().init::<TrainingBackend, BinaryCnn<TrainingBackend>>();
        let loss_fn = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&self.device);

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut order: Vec<usize> = (0..dataset.train.len()).collect();
        let mut stopper = EarlyStopping::new(self.config.patience, self.config.max_epochs);
        let mut best = model.valid();
        let mut history = Vec::new();

        log::info!(
            "training {}: {} train / {} validation samples, batch {}, up to {} epochs",
            component,
            dataset.train.len(),
            dataset.validation.len(),
            self.config.batch_size,
            self.config.max_epochs
        );

        while let TrainingState::Training { epoch } = stopper.state() {
            order.shuffle(&mut rng);
            let mut loss_sum = 0.0;
            let mut correct = 0usize;

            for batch in order.chunks(self.config.batch_size) {
                let samples: Vec<&LabeledImage> =
                    batch.iter().map(|&i| &dataset.train[i]).collect();
                let images: Vec<&RgbImage> = samples.iter().map(|s| &s.image).collect();
                let labels: Vec<i64> = samples.iter().map(|s| s.label as i64).collect();

                let inputs = batch_tensor::<TrainingBackend>(&images, &self.device);
                let targets = Tensor::<TrainingBackend, 2, Int>::from_data(
                    TensorData::new(labels.clone(), [labels.len(), 1]),
                    &self.device,
                );

                let logits = model.forward_logits(inputs);
                let loss = loss_fn.forward(logits.clone(), targets);

                loss_sum += loss.clone().into_scalar().elem::<f64>() * labels.len() as f64;
                let logits = logits
                    .inner()
                    .into_data()
                    .convert::<f32>()
                    .to_vec::<f32>()
                    .map_err(|e| anyhow!("failed to read logits: {:?}", e))?;
                correct += logits
                    .iter()
                    .zip(&labels)
                    .filter(|(logit, label)| ((**logit > 0.0) as i64) == **label)
                    .count();

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(self.config.learning_rate, model, grads);
            }
            stopper.finish_training_pass();

            let valid = model.valid();
            let probabilities = predict_all(
                &valid,
                &dataset.validation,
                self.config.batch_size,
                &self.device,
            )?;
            let (val_loss, val_accuracy) = loss_and_accuracy(&probabilities, &dataset.validation);
            let improved = stopper.record(val_accuracy);
            if improved {
                best = valid;
            }

            let metrics = EpochMetrics {
                epoch,
                train_loss: loss_sum / dataset.train.len() as f64,
                train_accuracy: correct as f64 / dataset.train.len() as f64,
                val_loss,
                val_accuracy,
                improved,
            };
            log::info!(
                "{} epoch {}: loss={:.4} acc={:.4} val_loss={:.4} val_acc={:.4}{}",
                component,
                epoch,
                metrics.train_loss,
                metrics.train_accuracy,
                metrics.val_loss,
                metrics.val_accuracy,
                if improved { " *" } else { "" }
            );
            on_epoch(&metrics);
            history.push(metrics);
        }

        let final_state = stopper.state();
        let (best_epoch, best_val_accuracy) = stopper
            .best()
            .ok_or_else(|| anyhow!("training finished without evaluating an epoch"))?;
        match final_state {
            TrainingState::EarlyStopped { epoch, .. } => log::info!(
                "{}: early stop after epoch {}; restoring epoch {} (val_acc={:.4})",
                component,
                epoch,
                best_epoch,
                best_val_accuracy
            ),
            _ => log::info!(
                "{}: reached epoch cap {}; restoring epoch {} (val_acc={:.4})",
                component,
                history.len(),
                best_epoch,
                best_val_accuracy
            ),
        }

        let validation_probabilities =
            predict_all(&best, &dataset.validation, self.config.batch_size, &self.device)?;
        let actual: Vec<u8> = dataset.validation.iter().map(|s| s.label).collect();
        let predicted: Vec<u8> = validation_probabilities
            .iter()
            .map(|p| (*p > crate::classify::OPEN_THRESHOLD) as u8)
            .collect();
        let report = ClassificationReport::from_labels(&actual, &predicted);

        Ok(TrainedClassifier {
            component,
            config: self.config.model.clone(),
            model: best,
            outcome: TrainingOutcome {
                final_state,
                epochs_run: history.len(),
                best_epoch,
                best_val_accuracy,
                history,
            },
            report,
            validation_probabilities,
            seed: self.config.seed,
            train_samples: dataset.train.len(),
            val_samples: dataset.validation.len(),
        })
    }
}

/// Open-probabilities for `samples`, in order, with dropout disabled.
pub fn predict_all(
    model: &BinaryCnn<InferenceBackend>,
    samples: &[LabeledImage],
    batch_size: usize,
    device: &<InferenceBackend as Backend>::Device,
) -> Result<Vec<f32>> {
    let mut out = Vec::with_capacity(samples.len());
    for chunk in samples.chunks(batch_size.max(1)) {
        let images: Vec<&RgbImage> = chunk.iter().map(|s| &s.image).collect();
        let probs = model
            .forward(batch_tensor::<InferenceBackend>(&images, device))
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("failed to read predictions: {:?}", e))?;
        out.extend(probs);
    }
    Ok(out)
}

fn loss_and_accuracy(probabilities: &[f32], samples: &[LabeledImage]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut loss = 0.0;
    let mut correct = 0usize;
    for (p, sample) in probabilities.iter().zip(samples) {
        let p = (*p as f64).clamp(LOSS_EPSILON, 1.0 - LOSS_EPSILON);
        let y = sample.label as f64;
        loss -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();
        if ((p > crate::classify::OPEN_THRESHOLD as f64) as u8) == sample.label {
            correct += 1;
        }
    }
    let n = samples.len() as f64;
    (loss / n, correct as f64 / n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::path::PathBuf;

    fn sample(label: u8, value: u8) -> LabeledImage {
        LabeledImage {
            path: PathBuf::from(format!("{}_{}.png", label, value)),
            label,
            image: RgbImage::from_pixel(24, 24, Rgb([value, value, value])),
        }
    }

    #[test]
    fn validation_loss_and_accuracy() {
        let samples = vec![sample(1, 200), sample(0, 40)];
        let (loss, acc) = loss_and_accuracy(&[0.9, 0.2], &samples);
        assert!((acc - 1.0).abs() < 1e-12);
        let expected = -((0.9f64).ln() + (0.8f64).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-6);
    }

    #[test]
    fn rejects_dataset_at_other_resolution() {
        let dataset = SplitDataset {
            image_size: 24,
            train: vec![sample(0, 40), sample(1, 200)],
            validation: vec![sample(0, 40)],
            summary: Default::default(),
        };
        let trainer = Trainer::new(TrainerConfig {
            model: BinaryCnnConfig::new().with_image_size(32),
            ..TrainerConfig::default()
        });
        assert!(trainer.fit(Component::Hood, &dataset, |_| {}).is_err());
    }

    #[test]
    fn config_validation() {
        assert!(TrainerConfig::default().validate().is_ok());
        let bad = TrainerConfig {
            batch_size: 0,
            ..TrainerConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = TrainerConfig {
            learning_rate: 0.0,
            ..TrainerConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
