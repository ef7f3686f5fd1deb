//! Error types for trialkit.
//!
//! Uses `thiserror` for a top-level [`TrialError`] with one nested enum per
//! failure class: hyperparameter validation, training, and reporting. Every
//! class is fatal for the trial; the process maps it to an exit code.

use std::path::PathBuf;

/// Top-level error type for a single trial.
#[derive(Debug, thiserror::Error)]
pub enum TrialError {
    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(#[from] HyperparameterError),

    #[error("Training failed: {0}")]
    Training(#[from] TrainingFailure),

    #[error("Reporting failed: {0}")]
    Reporting(#[from] ReportingError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while turning raw arguments into a [`crate::HyperparameterSet`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HyperparameterError {
    #[error("missing required hyperparameter '{name}'")]
    Missing { name: String },

    #[error("unknown hyperparameter '{name}'")]
    Unknown { name: String },

    #[error("hyperparameter '{name}' supplied more than once")]
    Duplicate { name: String },

    #[error("hyperparameter '{name}': cannot parse '{value}' as {expected}")]
    Malformed {
        name: String,
        value: String,
        expected: &'static str,
    },

    #[error("hyperparameter '{name}' = {value} is outside the accepted domain {domain}")]
    OutOfDomain {
        name: String,
        value: String,
        domain: String,
    },
}

/// Errors raised while the objective is training or evaluating.
#[derive(Debug, thiserror::Error)]
pub enum TrainingFailure {
    #[error("numerical instability at epoch {epoch}: training loss is {loss}")]
    NumericalInstability { epoch: usize, loss: f64 },

    #[error("metric '{name}' is not finite ({value})")]
    NonFiniteMetric { name: String, value: f64 },

    #[error("invalid training data: {0}")]
    InvalidData(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("training was cancelled")]
    Cancelled,

    #[error("training panicked: {0}")]
    Panicked(String),
}

/// Errors raised while emitting a result to the controller or the output directory.
#[derive(Debug, thiserror::Error)]
pub enum ReportingError {
    #[error("metric '{name}' was not produced by the objective")]
    MissingMetric { name: String },

    #[error("metric name '{name}' is not accepted by the metrics collector")]
    InvalidMetricName { name: String },

    #[error("metric '{name}' is configured more than once")]
    DuplicateMetric { name: String },

    #[error("invalid line template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("output path {path} is not writable: {source}")]
    OutputNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write metrics: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize metrics: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("trial was cancelled before its result was reported")]
    Cancelled,
}

impl TrialError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Process exit status for this error. Always non-zero.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidHyperparameter(_) => 3,
            Self::Training(_) => 4,
            Self::Reporting(_) => 5,
            Self::Config(_) => 6,
            Self::Internal(_) => 1,
        }
    }
}

impl From<figment::Error> for TrialError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}
