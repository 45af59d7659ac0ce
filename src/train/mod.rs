//! Offline training for one component's classifier.
//!
//! - `trainer`: Adam + binary cross-entropy over seeded mini-batches
//! - `early_stopping`: the epoch-loop state machine (patience on validation accuracy)
//! - `metrics`: precision/recall/F1 and confusion matrix for offline inspection

pub mod early_stopping;
pub mod metrics;
pub mod trainer;

pub use early_stopping::{EarlyStopping, TrainingState};
pub use metrics::{ClassMetrics, ClassificationReport, ConfusionMatrix};
pub use trainer::{
    predict_all, EpochMetrics, TrainedClassifier, Trainer, TrainerConfig, TrainingOutcome,
};
