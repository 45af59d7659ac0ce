use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Component;

/// `P(open)` strictly above this value is reported as open.
pub const OPEN_THRESHOLD: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Open,
    Closed,
    /// Sentinel for a component whose classifier could not answer.
    Unknown,
}

/// Status plus certainty in the chosen label.
///
/// For `Open`/`Closed`, `conf` is in `[0.5, 1.0]`. For `Unknown` it is exactly `0.0`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub status: Status,
    pub conf: f32,
}

impl Prediction {
    pub const UNKNOWN: Prediction = Prediction {
        status: Status::Unknown,
        conf: 0.0,
    };

    /// Decision rule over a raw open-probability.
    ///
    /// Returns `None` when `p` is not a finite value in `[0, 1]`.
    pub fn from_probability(p: f32) -> Option<Self> {
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return None;
        }
        if p > OPEN_THRESHOLD {
            Some(Self {
                status: Status::Open,
                conf: p,
            })
        } else {
            Some(Self {
                status: Status::Closed,
                conf: 1.0 - p,
            })
        }
    }
}

/// One prediction per registered component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusReport {
    entries: BTreeMap<Component, Prediction>,
}

impl StatusReport {
    pub(crate) fn from_entries(entries: BTreeMap<Component, Prediction>) -> Self {
        Self { entries }
    }

    pub fn get(&self, component: Component) -> Option<&Prediction> {
        self.entries.get(&component)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Component, &Prediction)> {
        self.entries.iter().map(|(c, p)| (*c, p))
    }

    pub fn components(&self) -> Vec<Component> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Components currently reported open.
    pub fn open_components(&self) -> Vec<Component> {
        self.entries
            .iter()
            .filter(|(_, p)| p.status == Status::Open)
            .map(|(c, _)| *c)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_rule_reports_certainty_of_chosen_label() {
        let open = Prediction::from_probability(0.8).unwrap();
        assert_eq!(open.status, Status::Open);
        assert!((open.conf - 0.8).abs() < 1e-6);

        let closed = Prediction::from_probability(0.2).unwrap();
        assert_eq!(closed.status, Status::Closed);
        assert!((closed.conf - 0.8).abs() < 1e-6);
    }

    #[test]
    fn exactly_half_is_closed() {
        let p = Prediction::from_probability(0.5).unwrap();
        assert_eq!(p.status, Status::Closed);
        assert_eq!(p.conf, 0.5);
    }

    #[test]
    fn confidence_never_drops_below_half() {
        for i in 0..=100 {
            let p = Prediction::from_probability(i as f32 / 100.0).unwrap();
            assert!(p.conf >= 0.5 && p.conf <= 1.0, "p={} conf={}", i, p.conf);
        }
    }

    #[test]
    fn rejects_non_finite_and_out_of_range() {
        assert!(Prediction::from_probability(f32::NAN).is_none());
        assert!(Prediction::from_probability(f32::INFINITY).is_none());
        assert!(Prediction::from_probability(1.5).is_none());
        assert!(Prediction::from_probability(-0.1).is_none());
    }

    #[test]
    fn report_serializes_with_component_keys() {
        let mut entries = BTreeMap::new();
        entries.insert(
            Component::Hood,
            Prediction {
                status: Status::Open,
                conf: 0.75,
            },
        );
        entries.insert(Component::RearLeft, Prediction::UNKNOWN);
        let report = StatusReport::from_entries(entries);

        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["hood"]["status"], "open");
        assert_eq!(json["hood"]["conf"], 0.75);
        assert_eq!(json["rear_left"]["status"], "unknown");
        assert_eq!(json["rear_left"]["conf"], 0.0);
        assert_eq!(report.open_components(), vec![Component::Hood]);
    }
}
