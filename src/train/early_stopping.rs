use serde::Serialize;

/// Position of the epoch loop.
///
/// `Training` and `EvaluatingEpoch` alternate once per epoch; the loop ends in one of
/// the two terminal states, after which the best-seen parameters are restored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrainingState {
    Training { epoch: usize },
    EvaluatingEpoch { epoch: usize },
    EarlyStopped { epoch: usize, best_epoch: usize },
    ConvergedByEpochCap { epoch: usize, best_epoch: usize },
}

impl TrainingState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrainingState::EarlyStopped { .. } | TrainingState::ConvergedByEpochCap { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrainingState::Training { .. } => "training",
            TrainingState::EvaluatingEpoch { .. } => "evaluating_epoch",
            TrainingState::EarlyStopped { .. } => "early_stopped",
            TrainingState::ConvergedByEpochCap { .. } => "converged_by_epoch_cap",
        }
    }
}

/// Patience-based stopping on validation accuracy.
///
/// An epoch improves only when its accuracy is strictly above the best so far.
/// `patience` consecutive non-improving epochs stop the loop.
#[derive(Clone, Debug)]
pub struct EarlyStopping {
    patience: usize,
    max_epochs: usize,
    best: Option<(usize, f64)>,
    wait: usize,
    state: TrainingState,
}

impl EarlyStopping {
    pub fn new(patience: usize, max_epochs: usize) -> Self {
        Self {
            patience: patience.max(1),
            max_epochs: max_epochs.max(1),
            best: None,
            wait: 0,
            state: TrainingState::Training { epoch: 1 },
        }
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    /// Best `(epoch, accuracy)` seen so far.
    pub fn best(&self) -> Option<(usize, f64)> {
        self.best
    }

    /// `Training{e}` -> `EvaluatingEpoch{e}`. Ignored in any other state.
    pub fn finish_training_pass(&mut self) {
        if let TrainingState::Training { epoch } = self.state {
            self.state = TrainingState::EvaluatingEpoch { epoch };
        }
    }

    /// Record the epoch's validation accuracy and advance.
    ///
    /// Returns true when this epoch is the new best (the caller keeps its parameters).
    pub fn record(&mut self, val_accuracy: f64) -> bool {
        let TrainingState::EvaluatingEpoch { epoch } = self.state else {
            return false;
        };

        let improved = match self.best {
            Some((_, best)) => val_accuracy > best,
            None => true,
        };
        if improved {
            self.best = Some((epoch, val_accuracy));
            self.wait = 0;
        } else {
            self.wait += 1;
        }

        let best_epoch = self.best.map(|(e, _)| e).unwrap_or(epoch);
        self.state = if self.wait >= self.patience {
            TrainingState::EarlyStopped { epoch, best_epoch }
        } else if epoch >= self.max_epochs {
            TrainingState::ConvergedByEpochCap { epoch, best_epoch }
        } else {
            TrainingState::Training { epoch: epoch + 1 }
        };
        improved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stopper: &mut EarlyStopping, accuracies: &[f64]) -> Vec<bool> {
        accuracies
            .iter()
            .map(|acc| {
                stopper.finish_training_pass();
                stopper.record(*acc)
            })
            .collect()
    }

    #[test]
    fn stops_after_patience_epochs_without_improvement() {
        let mut stopper = EarlyStopping::new(4, 50);
        let improved = run(&mut stopper, &[0.6, 0.8, 0.8, 0.7, 0.79, 0.8]);

        assert_eq!(improved, vec![true, true, false, false, false, false]);
        assert_eq!(
            stopper.state(),
            TrainingState::EarlyStopped {
                epoch: 6,
                best_epoch: 2
            }
        );
        assert_eq!(stopper.best(), Some((2, 0.8)));
    }

    #[test]
    fn improvement_resets_patience() {
        let mut stopper = EarlyStopping::new(2, 50);
        run(&mut stopper, &[0.5, 0.5, 0.6, 0.6]);
        assert_eq!(stopper.state(), TrainingState::Training { epoch: 5 });
    }

    #[test]
    fn epoch_cap_is_terminal() {
        let mut stopper = EarlyStopping::new(4, 3);
        run(&mut stopper, &[0.5, 0.6, 0.7]);

        assert_eq!(
            stopper.state(),
            TrainingState::ConvergedByEpochCap {
                epoch: 3,
                best_epoch: 3
            }
        );
        assert!(stopper.state().is_terminal());
    }

    #[test]
    fn record_outside_evaluation_is_ignored() {
        let mut stopper = EarlyStopping::new(4, 50);
        assert!(!stopper.record(1.0));
        assert_eq!(stopper.state(), TrainingState::Training { epoch: 1 });
        assert_eq!(stopper.best(), None);
    }
}
