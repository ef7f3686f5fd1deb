//! Objective functions: hyperparameters in, metrics out.

pub mod dataset;
pub mod softmax;

pub use softmax::SoftmaxObjective;

use crate::config::TrainingContext;
use crate::error::TrialError;
use crate::hyperparams::{HyperparameterSet, ParamSpec};
use crate::result::TrialResult;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Serialized model state stored next to the standalone metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelState {
    pub kind: String,
    /// Row-major `[rows, cols]` of `weights`.
    pub shape: [usize; 2],
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
}

/// Outcome of a successful evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub result: TrialResult,
    pub model: Option<ModelState>,
}

/// A trainable objective evaluated once per trial.
///
/// `evaluate` must be deterministic for identical hyperparameters and
/// context, must not clamp values, and must return
/// `TrainingFailure::Cancelled` soon after `cancel` fires. It runs on a
/// blocking thread and has no timeout of its own.
pub trait Objective: Send + Sync {
    fn name(&self) -> &str;

    /// Every accepted hyperparameter.
    fn params(&self) -> &[ParamSpec];

    /// Every metric `evaluate` produces.
    fn metric_names(&self) -> &[&'static str];

    fn objective_metric(&self) -> &str;

    fn evaluate(
        &self,
        hyperparameters: &HyperparameterSet,
        context: &TrainingContext,
        cancel: &CancellationToken,
    ) -> Result<Evaluation, TrialError>;
}
