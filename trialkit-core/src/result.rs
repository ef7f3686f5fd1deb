//! Trial results: named scalar metrics produced once per trial.

use crate::error::TrainingFailure;
use serde::Serialize;
use std::collections::BTreeMap;

/// Metrics produced by one trial. Always contains the objective metric and
/// only finite values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialResult {
    objective_metric: String,
    metrics: BTreeMap<String, f64>,
}

impl TrialResult {
    pub fn new(
        objective_metric: impl Into<String>,
        metrics: impl IntoIterator<Item = (String, f64)>,
    ) -> Result<Self, TrainingFailure> {
        let objective_metric = objective_metric.into();
        let metrics: BTreeMap<String, f64> = metrics.into_iter().collect();

        if let Some((name, value)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(TrainingFailure::NonFiniteMetric {
                name: name.clone(),
                value: *value,
            });
        }
        if !metrics.contains_key(&objective_metric) {
            return Err(TrainingFailure::InvalidData(format!(
                "objective metric '{objective_metric}' was not produced"
            )));
        }

        Ok(Self {
            objective_metric,
            metrics,
        })
    }

    pub fn objective_metric(&self) -> &str {
        &self.objective_metric
    }

    pub fn objective_value(&self) -> f64 {
        // Presence is checked in `new`.
        self.metrics
            .get(&self.objective_metric)
            .copied()
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_requires_objective_metric() {
        let err = TrialResult::new("accuracy", [("loss".to_string(), 0.3)]).unwrap_err();
        assert!(matches!(err, TrainingFailure::InvalidData(_)));
    }

    #[test]
    fn test_result_rejects_nan() {
        let err = TrialResult::new(
            "accuracy",
            [("accuracy".to_string(), 0.9), ("loss".to_string(), f64::NAN)],
        )
        .unwrap_err();
        match err {
            TrainingFailure::NonFiniteMetric { name, .. } => assert_eq!(name, "loss"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_objective_value() {
        let r = TrialResult::new(
            "accuracy",
            [("accuracy".to_string(), 0.75), ("loss".to_string(), 0.5)],
        )
        .unwrap();
        assert_eq!(r.objective_value(), 0.75);
        assert_eq!(r.get("loss"), Some(0.5));
        assert_eq!(r.get("f1"), None);
    }
}
