use std::fmt;

use serde::Serialize;

use crate::CLASS_NAMES;

/// 2x2 confusion matrix indexed `[actual][predicted]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn from_labels(actual: &[u8], predicted: &[u8]) -> Self {
        let mut counts = [[0usize; 2]; 2];
        for (a, p) in actual.iter().zip(predicted) {
            counts[(*a).min(1) as usize][(*p).min(1) as usize] += 1;
        }
        Self { counts }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        self.counts[0][0] + self.counts[1][1]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision/recall/F1 plus the confusion matrix.
///
/// Undefined ratios (no predictions or no support) are reported as 0.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    pub fn from_labels(actual: &[u8], predicted: &[u8]) -> Self {
        let confusion = ConfusionMatrix::from_labels(actual, predicted);
        let classes = (0..2)
            .map(|class| {
                let tp = confusion.counts[class][class];
                let predicted_total = confusion.counts[0][class] + confusion.counts[1][class];
                let support = confusion.counts[class][0] + confusion.counts[class][1];
                let precision = ratio(tp, predicted_total);
                let recall = ratio(tp, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    name: CLASS_NAMES[class].to_string(),
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();
        Self {
            classes,
            accuracy: ratio(confusion.correct(), confusion.total()),
            confusion,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for class in &self.classes {
            writeln!(
                f,
                "{:>12} {:>10.4} {:>10.4} {:>10.4} {:>10}",
                class.name, class.precision, class.recall, class.f1, class.support
            )?;
        }
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10.4} {:>10}",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.confusion.total()
        )?;
        writeln!(f)?;
        writeln!(f, "confusion matrix (rows = actual, cols = predicted):")?;
        for (name, row) in CLASS_NAMES.iter().zip(self.confusion.counts.iter()) {
            writeln!(f, "{:>12} {:>8} {:>8}", name, row[0], row[1])?;
        }
        Ok(())
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_matches_hand_computed_values() {
        // actual:    0 0 0 0 1 1 1 1 1 1
        // predicted: 0 0 0 1 1 1 1 1 0 0
        let actual = [0, 0, 0, 0, 1, 1, 1, 1, 1, 1];
        let predicted = [0, 0, 0, 1, 1, 1, 1, 1, 0, 0];
        let report = ClassificationReport::from_labels(&actual, &predicted);

        assert_eq!(report.confusion.counts, [[3, 1], [2, 4]]);
        assert!((report.accuracy - 0.7).abs() < 1e-12);

        let closed = &report.classes[0];
        assert!((closed.precision - 0.6).abs() < 1e-12);
        assert!((closed.recall - 0.75).abs() < 1e-12);
        assert_eq!(closed.support, 4);

        let open = &report.classes[1];
        assert!((open.precision - 0.8).abs() < 1e-12);
        assert!((open.recall - 4.0 / 6.0).abs() < 1e-12);
        let expected_f1 = 2.0 * 0.8 * (4.0 / 6.0) / (0.8 + 4.0 / 6.0);
        assert!((open.f1 - expected_f1).abs() < 1e-12);
    }

    #[test]
    fn undefined_precision_is_zero() {
        let report = ClassificationReport::from_labels(&[0, 1], &[0, 0]);
        assert_eq!(report.classes[1].precision, 0.0);
        assert_eq!(report.classes[1].f1, 0.0);
        let text = report.to_string();
        assert!(text.contains("confusion matrix"));
        assert!(text.contains("open"));
    }
}
