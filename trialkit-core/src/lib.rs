//! # trialkit-core: the single-trial training contract
//!
//! One trial = one hyperparameter assignment, one training run, one reported
//! result. This crate provides the pieces both entry points share:
//!
//! - [`hyperparams`]: declared parameters and strict validation
//! - [`objective`]: the [`Objective`] trait and the built-in softmax classifier
//! - [`result`]: [`TrialResult`], the metrics of one trial
//! - [`report`]: sinks and the single serialization boundary for metric lines
//! - [`artifact`]: the Standalone Trainer's output directory
//! - [`trial`]: the runner state machine

pub mod artifact;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod hyperparams;
pub mod objective;
pub mod persistence;
pub mod report;
pub mod result;
pub mod trial;

pub use artifact::ArtifactSink;
pub use config::{TrainingContext, TrialConfig, load_config};
pub use error::{HyperparameterError, ReportingError, TrainingFailure, TrialError};
pub use hyperparams::{HyperparameterSet, ParamKind, ParamSpec, ParamValue};
pub use objective::{Evaluation, Objective, SoftmaxObjective};
pub use report::{FileCollector, MetricFormat, MetricSink, StreamCollector};
pub use result::TrialResult;
pub use trial::{TrialOutcome, TrialPhase, TrialRunner};

use config::{Collector, ReportingConfig};

/// Build the controller-facing sink described by the reporting configuration.
///
/// Validates the line template and metric names against what `objective`
/// declares, so a misconfigured trial fails before training starts.
pub fn collector_from_config(
    config: &ReportingConfig,
    objective: &dyn Objective,
) -> Result<Box<dyn MetricSink>, TrialError> {
    let format = MetricFormat::from_config(config, objective.metric_names())?;
    Ok(match config.collector {
        Collector::Stdout => Box::new(StreamCollector::stdout(format)),
        Collector::File => Box::new(FileCollector::new(&config.metrics_file, format)),
    })
}
