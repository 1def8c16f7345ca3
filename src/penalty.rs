//! Penalty points.
//!
//! Each housemate accumulates points for missed chores or broken rules.
//! Crossing a threshold assigns extra tasks. Totals live in a
//! [`PenaltyStore`] owned by whoever constructs it; nothing is persisted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::PenaltyError;

/// One rung of the escalation ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    /// Total at or above which this rung applies
    pub points: u32,
    /// Extra tasks assigned when this rung applies
    pub extra_tasks: u32,
    /// Message shown to the housemate
    pub message: String,
}

/// Consequence of the highest threshold a total has reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consequence {
    pub threshold: u32,
    pub extra_tasks: u32,
    pub message: String,
}

/// Default ladder: 3, 5, 8 and 10 points map to 1, 2, 3 and 4 extra tasks.
pub fn default_thresholds() -> Vec<Threshold> {
    vec![
        Threshold {
            points: 3,
            extra_tasks: 1,
            message: "3 penalty points: 1 extra task assigned".to_string(),
        },
        Threshold {
            points: 5,
            extra_tasks: 2,
            message: "5 penalty points: 2 extra tasks assigned".to_string(),
        },
        Threshold {
            points: 8,
            extra_tasks: 3,
            message: "8 penalty points: 3 extra tasks assigned".to_string(),
        },
        Threshold {
            points: 10,
            extra_tasks: 4,
            message: "10 penalty points: 4 extra tasks assigned".to_string(),
        },
    ]
}

/// In-memory penalty totals keyed by person.
#[derive(Debug, Clone)]
pub struct PenaltyStore {
    /// Sorted highest first so evaluation can stop at the first match.
    thresholds: Vec<Threshold>,
    totals: HashMap<String, u32>,
}

impl Default for PenaltyStore {
    fn default() -> Self {
        Self::new(default_thresholds())
    }
}

impl PenaltyStore {
    pub fn new(mut thresholds: Vec<Threshold>) -> Self {
        thresholds.sort_by(|a, b| b.points.cmp(&a.points));
        Self {
            thresholds,
            totals: HashMap::new(),
        }
    }

    /// Current total for `person` (zero if never penalised).
    pub fn points(&self, person: &str) -> u32 {
        self.totals.get(person).copied().unwrap_or(0)
    }

    /// Add `delta` points to `person` and evaluate the new total.
    ///
    /// Negative deltas are rejected and leave the total unchanged.
    pub fn add_points(
        &mut self,
        person: &str,
        delta: i64,
    ) -> Result<Option<Consequence>, PenaltyError> {
        if delta < 0 {
            return Err(PenaltyError::NegativeDelta {
                person: person.to_string(),
                delta,
            });
        }
        let delta = u32::try_from(delta).unwrap_or(u32::MAX);
        let total = self.totals.entry(person.to_string()).or_insert(0);
        *total = total.saturating_add(delta);
        let total = *total;

        let consequence = self.evaluate(person);
        match &consequence {
            Some(c) => tracing::info!(
                person,
                total,
                threshold = c.threshold,
                extra_tasks = c.extra_tasks,
                "penalty threshold reached"
            ),
            None => tracing::debug!(person, total, "penalty points added"),
        }
        Ok(consequence)
    }

    /// Highest threshold met by `person`'s total, if any.
    pub fn evaluate(&self, person: &str) -> Option<Consequence> {
        let total = self.points(person);
        self.thresholds
            .iter()
            .find(|t| total >= t.points)
            .map(|t| Consequence {
                threshold: t.points,
                extra_tasks: t.extra_tasks,
                message: t.message.clone(),
            })
    }

    /// Clear one person's total.
    pub fn reset(&mut self, person: &str) {
        self.totals.remove(person);
    }

    /// Clear every total.
    pub fn reset_all(&mut self) {
        self.totals.clear();
    }

    pub fn people(&self) -> impl Iterator<Item = (&str, u32)> {
        self.totals.iter().map(|(name, total)| (name.as_str(), *total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_lowest_threshold_has_no_consequence() {
        let mut store = PenaltyStore::default();
        assert_eq!(store.add_points("sam", 2).unwrap(), None);
        assert_eq!(store.points("sam"), 2);
        assert_eq!(store.evaluate("nobody"), None);
    }

    #[test]
    fn test_each_threshold_maps_to_extra_tasks() {
        for (points, tasks) in [(3, 1), (5, 2), (8, 3), (10, 4)] {
            let mut store = PenaltyStore::default();
            let c = store.add_points("sam", points).unwrap().unwrap();
            assert_eq!(c.threshold, points as u32);
            assert_eq!(c.extra_tasks, tasks);
        }
    }

    #[test]
    fn test_highest_met_threshold_wins() {
        let mut store = PenaltyStore::default();
        store.add_points("sam", 4).unwrap();
        let c = store.add_points("sam", 3).unwrap().unwrap();
        assert_eq!(store.points("sam"), 7);
        assert_eq!(c.threshold, 5);
        assert_eq!(c.extra_tasks, 2);

        let c = store.add_points("sam", 20).unwrap().unwrap();
        assert_eq!(c.threshold, 10);
        assert_eq!(c.extra_tasks, 4);
    }

    #[test]
    fn test_negative_delta_rejected_and_total_unchanged() {
        let mut store = PenaltyStore::default();
        store.add_points("sam", 3).unwrap();
        let err = store.add_points("sam", -1).unwrap_err();
        assert_eq!(
            err,
            PenaltyError::NegativeDelta {
                person: "sam".to_string(),
                delta: -1
            }
        );
        assert_eq!(store.points("sam"), 3);
    }

    #[test]
    fn test_zero_delta_reevaluates() {
        let mut store = PenaltyStore::default();
        store.add_points("sam", 5).unwrap();
        let c = store.add_points("sam", 0).unwrap().unwrap();
        assert_eq!(c.threshold, 5);
    }

    #[test]
    fn test_totals_are_per_person() {
        let mut store = PenaltyStore::default();
        store.add_points("sam", 8).unwrap();
        store.add_points("alex", 1).unwrap();
        assert_eq!(store.evaluate("sam").unwrap().extra_tasks, 3);
        assert_eq!(store.evaluate("alex"), None);
    }

    #[test]
    fn test_reset_and_reset_all() {
        let mut store = PenaltyStore::default();
        store.add_points("sam", 8).unwrap();
        store.add_points("alex", 3).unwrap();
        store.reset("sam");
        assert_eq!(store.points("sam"), 0);
        assert_eq!(store.points("alex"), 3);
        store.reset_all();
        assert_eq!(store.people().count(), 0);
    }

    #[test]
    fn test_custom_thresholds_any_order() {
        let mut store = PenaltyStore::new(vec![
            Threshold {
                points: 1,
                extra_tasks: 1,
                message: "one".to_string(),
            },
            Threshold {
                points: 4,
                extra_tasks: 7,
                message: "four".to_string(),
            },
        ]);
        let c = store.add_points("sam", 6).unwrap().unwrap();
        assert_eq!(c.message, "four");
        assert_eq!(c.extra_tasks, 7);
    }
}
