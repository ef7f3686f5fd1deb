//! Trial execution: `Init -> ValidateParams -> Train -> {ReportSuccess | ReportFailure}`.
//!
//! [`TrialRunner`] drives one objective evaluation per invocation and hands
//! the result to a [`MetricSink`]. The Trial Runner and the Standalone
//! Trainer differ only in the sink they pass in.

use crate::config::TrainingContext;
use crate::error::{ReportingError, TrainingFailure, TrialError};
use crate::fingerprint::fingerprint;
use crate::hyperparams::HyperparameterSet;
use crate::objective::{Evaluation, Objective};
use crate::report::{MetricSink, Report};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Phase of a trial's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialPhase {
    Init,
    ValidateParams,
    Train,
    ReportSuccess,
    ReportFailure,
}

impl TrialPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ReportSuccess | Self::ReportFailure)
    }

    pub fn can_transition_to(self, next: TrialPhase) -> bool {
        use TrialPhase::*;
        matches!(
            (self, next),
            (Init, ValidateParams)
                | (ValidateParams, Train)
                | (Train, ReportSuccess)
                | (Init | ValidateParams | Train, ReportFailure)
        )
    }
}

/// Guarded phase history of one trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialState {
    history: Vec<TrialPhase>,
}

impl Default for TrialState {
    fn default() -> Self {
        Self::new()
    }
}

impl TrialState {
    pub fn new() -> Self {
        Self {
            history: vec![TrialPhase::Init],
        }
    }

    pub fn current(&self) -> TrialPhase {
        // History always starts with Init.
        self.history.last().copied().unwrap_or(TrialPhase::Init)
    }

    pub fn history(&self) -> &[TrialPhase] {
        &self.history
    }

    pub fn advance(&mut self, next: TrialPhase) -> Result<(), TrialError> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(TrialError::Internal(format!(
                "illegal trial transition {current:?} -> {next:?}"
            )));
        }
        tracing::debug!(from = ?current, to = ?next, "Trial phase");
        self.history.push(next);
        Ok(())
    }
}

/// Summary of a successful trial.
#[derive(Debug, Clone)]
pub struct TrialOutcome {
    pub run_id: String,
    pub fingerprint: String,
    pub evaluation: Evaluation,
    pub phases: Vec<TrialPhase>,
}

/// Runs a single objective evaluation and reports it exactly once.
pub struct TrialRunner {
    objective: Arc<dyn Objective>,
    context: TrainingContext,
    cancel: CancellationToken,
}

impl TrialRunner {
    pub fn new(objective: Arc<dyn Objective>, context: TrainingContext) -> Self {
        Self {
            objective,
            context,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one cancelled by a signal handler.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn objective(&self) -> &dyn Objective {
        self.objective.as_ref()
    }

    /// Execute one trial. On error nothing has been reported.
    pub async fn run(
        &self,
        run_id: &str,
        raw: &[(String, String)],
        sink: &mut dyn MetricSink,
    ) -> Result<TrialOutcome, TrialError> {
        let span = tracing::info_span!("trial", run_id, objective = self.objective.name());
        async {
            let started = Instant::now();
            let mut state = TrialState::new();
            match self.execute(&mut state, run_id, raw, sink).await {
                Ok(outcome) => {
                    tracing::info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        phases = ?state.history(),
                        "Trial succeeded"
                    );
                    Ok(outcome)
                }
                Err(err) => {
                    let failed_in = state.current();
                    if !failed_in.is_terminal() {
                        state.advance(TrialPhase::ReportFailure)?;
                    }
                    tracing::error!(
                        phase = ?failed_in,
                        exit_code = err.exit_code(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Trial failed: {err}"
                    );
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        state: &mut TrialState,
        run_id: &str,
        raw: &[(String, String)],
        sink: &mut dyn MetricSink,
    ) -> Result<TrialOutcome, TrialError> {
        state.advance(TrialPhase::ValidateParams)?;
        let hyperparameters = HyperparameterSet::parse(
            raw.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            self.objective.params(),
        )?;
        let fingerprint = fingerprint(self.objective.name(), &hyperparameters, &self.context);
        tracing::info!(
            hyperparameters = %hyperparameters.canonical_string(),
            %fingerprint,
            "Hyperparameters validated"
        );
        sink.prepare()?;
        tracing::debug!(sink = %sink.describe(), "Sink ready");

        state.advance(TrialPhase::Train)?;
        let evaluation = self.train(hyperparameters.clone()).await?;
        tracing::info!(
            objective_metric = evaluation.result.objective_metric(),
            value = evaluation.result.objective_value(),
            "Training finished"
        );

        if self.cancel.is_cancelled() {
            return Err(ReportingError::Cancelled.into());
        }
        let report = Report {
            run_id,
            objective: self.objective.name(),
            fingerprint: &fingerprint,
            hyperparameters: &hyperparameters,
            evaluation: &evaluation,
            finished_at: Utc::now(),
        };
        sink.report(&report)?;
        state.advance(TrialPhase::ReportSuccess)?;

        Ok(TrialOutcome {
            run_id: run_id.to_string(),
            fingerprint,
            evaluation,
            phases: state.history().to_vec(),
        })
    }

    async fn train(&self, hyperparameters: HyperparameterSet) -> Result<Evaluation, TrialError> {
        let objective = Arc::clone(&self.objective);
        let context = self.context.clone();
        let cancel = self.cancel.clone();

        let joined = tokio::task::spawn_blocking(move || {
            objective.evaluate(&hyperparameters, &context, &cancel)
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                Err(TrainingFailure::Panicked(panic_message(join_err.into_panic())).into())
            }
            Err(join_err) => Err(TrainingFailure::Panicked(join_err.to_string()).into()),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
