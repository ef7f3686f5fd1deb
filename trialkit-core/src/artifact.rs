//! Standalone training artifacts written to a mounted output directory.
//!
//! Layout of the output directory:
//!
//! ```text
//! <output_dir>/
//!   metrics.json   # TrainingArtifact, schema_version 1
//!   model.json     # ModelState, only when save_model is enabled
//! ```

use crate::error::ReportingError;
use crate::hyperparams::HyperparameterSet;
use crate::objective::ModelState;
use crate::persistence;
use crate::report::{MetricSink, Report};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;
pub const METRICS_FILE: &str = "metrics.json";
pub const MODEL_FILE: &str = "model.json";

/// Versioned metrics document read by downstream jobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingArtifact<'a> {
    pub schema_version: u32,
    pub run_id: &'a str,
    pub created_at: DateTime<Utc>,
    pub objective: &'a str,
    pub objective_metric: &'a str,
    pub metrics: &'a BTreeMap<String, f64>,
    pub hyperparameters: &'a HyperparameterSet,
    pub fingerprint: &'a str,
}

/// Sink that persists the result and model state into a directory.
pub struct ArtifactSink {
    output_dir: PathBuf,
    save_model: bool,
}

impl ArtifactSink {
    pub fn new(output_dir: impl Into<PathBuf>, save_model: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            save_model,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn write_model(&self, model: &ModelState) -> Result<(), ReportingError> {
        let path = self.output_dir.join(MODEL_FILE);
        persistence::atomic_write_json(&path, model)?;
        tracing::info!(path = %path.display(), "Model state written");
        Ok(())
    }
}

impl MetricSink for ArtifactSink {
    fn describe(&self) -> String {
        format!("artifact directory {}", self.output_dir.display())
    }

    fn prepare(&mut self) -> Result<(), ReportingError> {
        persistence::ensure_writable_dir(&self.output_dir).map_err(|source| {
            ReportingError::OutputNotWritable {
                path: self.output_dir.clone(),
                source,
            }
        })
    }

    fn report(&mut self, report: &Report<'_>) -> Result<(), ReportingError> {
        let result = &report.evaluation.result;

        // Model first: metrics.json appearing is the completion signal.
        if self.save_model {
            match &report.evaluation.model {
                Some(model) => self.write_model(model)?,
                None => tracing::warn!("save_model is enabled but the objective produced no model state"),
            }
        }

        let artifact = TrainingArtifact {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            run_id: report.run_id,
            created_at: report.finished_at,
            objective: report.objective,
            objective_metric: result.objective_metric(),
            metrics: result.metrics(),
            hyperparameters: report.hyperparameters,
            fingerprint: report.fingerprint,
        };
        let path = self.output_dir.join(METRICS_FILE);
        persistence::atomic_write_json(&path, &artifact)?;
        tracing::info!(path = %path.display(), "Metrics artifact written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::Evaluation;
    use crate::result::TrialResult;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn evaluation(model: Option<ModelState>) -> Evaluation {
        Evaluation {
            result: TrialResult::new(
                "accuracy",
                [("accuracy".to_string(), 0.8), ("loss".to_string(), 0.4)],
            )
            .unwrap(),
            model,
        }
    }

    fn model() -> ModelState {
        ModelState {
            kind: "softmax_regression".into(),
            shape: [2, 1],
            weights: vec![0.5, -0.5],
            bias: vec![0.0, 0.1],
        }
    }

    fn report_into(sink: &mut ArtifactSink, evaluation: &Evaluation) {
        let hyperparameters = HyperparameterSet::default();
        let report = Report {
            run_id: "run-42",
            objective: "softmax_classifier",
            fingerprint: "f00d",
            hyperparameters: &hyperparameters,
            evaluation,
            finished_at: Utc::now(),
        };
        sink.report(&report).unwrap();
    }

    #[test]
    fn test_creates_missing_output_dir_and_writes_metrics() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("output");
        let mut sink = ArtifactSink::new(&out, true);
        sink.prepare().unwrap();
        report_into(&mut sink, &evaluation(Some(model())));

        let metrics: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join(METRICS_FILE)).unwrap())
                .unwrap();
        assert_eq!(metrics["schema_version"], 1);
        assert_eq!(metrics["run_id"], "run-42");
        assert_eq!(metrics["objective_metric"], "accuracy");
        assert_eq!(metrics["metrics"], serde_json::json!({"accuracy": 0.8, "loss": 0.4}));
        assert_eq!(metrics["fingerprint"], "f00d");
        assert!(out.join(MODEL_FILE).exists());
    }

    #[test]
    fn test_prepare_twice_on_same_dir() {
        let dir = TempDir::new().unwrap();
        let mut first = ArtifactSink::new(dir.path().join("output"), false);
        let mut second = ArtifactSink::new(dir.path().join("output"), false);
        first.prepare().unwrap();
        report_into(&mut first, &evaluation(None));
        second.prepare().unwrap();
        report_into(&mut second, &evaluation(None));
        assert!(!dir.path().join("output").join(MODEL_FILE).exists());
    }

    #[test]
    fn test_prepare_fails_loudly_when_path_is_a_file() {
        let dir = TempDir::new().unwrap();
        let occupied = dir.path().join("output");
        std::fs::write(&occupied, b"x").unwrap();
        let mut sink = ArtifactSink::new(&occupied, true);
        let err = sink.prepare().unwrap_err();
        match err {
            ReportingError::OutputNotWritable { path, .. } => assert_eq!(path, occupied),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
