//! Subcommand handlers.

use crate::cli::{self, Cli, Commands};
use anyhow::Context;
use clap::ArgMatches;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trialkit_core::{
    ArtifactSink, Objective, TrialConfig, TrialOutcome, TrialRunner, collector_from_config,
    load_config,
};

pub async fn dispatch(
    cli: Cli,
    matches: &ArgMatches,
    objective: Arc<dyn Objective>,
) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let runner =
        TrialRunner::new(Arc::clone(&objective), config.training.clone()).with_cancellation(cancel);

    match cli.command {
        Commands::Run { trial_name } => {
            let sub = matches
                .subcommand_matches("run")
                .context("missing run arguments")?;
            let raw = cli::hyperparameters(sub, objective.params());
            run_trial(&runner, &config, trial_name, raw).await
        }
        Commands::Train { output_dir } => {
            let sub = matches
                .subcommand_matches("train")
                .context("missing train arguments")?;
            let overrides = cli::hyperparameters(sub, objective.params());
            train(&runner, &config, output_dir, overrides).await
        }
    }
}

/// Controller-driven trial: metric lines go to the configured collector.
async fn run_trial(
    runner: &TrialRunner,
    config: &TrialConfig,
    trial_name: Option<String>,
    raw: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let mut sink = collector_from_config(&config.reporting, runner.objective())?;
    let run_id = trial_name.unwrap_or_else(new_run_id);
    tracing::debug!(collector = %sink.describe(), "Reporting to collector");

    runner.run(&run_id, &raw, sink.as_mut()).await?;
    Ok(())
}

/// Batch training: configured hyperparameters (CLI/env overrides win) and an
/// artifact directory instead of a collector.
async fn train(
    runner: &TrialRunner,
    config: &TrialConfig,
    output_dir: Option<PathBuf>,
    overrides: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let raw = merge_overrides(config.standalone.raw_hyperparameters(), overrides);
    let output_dir = output_dir.unwrap_or_else(|| config.standalone.output_dir.clone());
    let run_id = config.standalone.run_id.clone().unwrap_or_else(new_run_id);

    let mut sink = ArtifactSink::new(output_dir, config.standalone.save_model);
    let outcome = runner.run(&run_id, &raw, &mut sink).await?;
    log_summary(&outcome, &sink);
    Ok(())
}

fn log_summary(outcome: &TrialOutcome, sink: &ArtifactSink) {
    let result = &outcome.evaluation.result;
    for (name, value) in result.metrics() {
        tracing::info!(metric = %name, value, "Final metric");
    }
    tracing::info!(
        run_id = %outcome.run_id,
        fingerprint = %outcome.fingerprint,
        output_dir = %sink.output_dir().display(),
        "Training complete"
    );
}

/// Replace configured values by name; overrides for new names are appended.
fn merge_overrides(
    mut base: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
) -> Vec<(String, String)> {
    for (name, value) in overrides {
        match base.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => base.push((name, value)),
        }
    }
    base
}

fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Cancel the trial on Ctrl+C or SIGTERM (pod eviction, trial kill).
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to listen for SIGTERM: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::warn!("Interrupted; cancelling trial"),
            _ = terminate => tracing::warn!("Terminated; cancelling trial"),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::FromArgMatches;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use trialkit_core::config::TrainingContext;
    use trialkit_core::{SoftmaxObjective, TrialError};

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn small_config(output_dir: PathBuf) -> TrialConfig {
        let mut config = TrialConfig::default();
        config.training = TrainingContext {
            samples: 90,
            features: 3,
            ..TrainingContext::default()
        };
        config.standalone.output_dir = output_dir;
        config.standalone.run_id = Some("train-1".into());
        config
    }

    fn runner(config: &TrialConfig) -> TrialRunner {
        TrialRunner::new(Arc::new(SoftmaxObjective::new()), config.training.clone())
    }

    #[test]
    fn test_overrides_replace_by_name() {
        let merged = merge_overrides(
            pairs(&[("batch_size", "32"), ("learning_rate", "0.01")]),
            pairs(&[("learning_rate", "0.5"), ("epochs", "2")]),
        );
        assert_eq!(
            merged,
            pairs(&[("batch_size", "32"), ("learning_rate", "0.5"), ("epochs", "2")])
        );
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }

    #[tokio::test]
    async fn test_train_writes_artifacts() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("output");
        let config = small_config(out.clone());

        train(&runner(&config), &config, None, pairs(&[("epochs", "2")]))
            .await
            .unwrap();

        let metrics: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("metrics.json")).unwrap())
                .unwrap();
        assert_eq!(metrics["run_id"], "train-1");
        assert_eq!(metrics["hyperparameters"]["epochs"], 2);
        assert_eq!(metrics["hyperparameters"]["learning_rate"], 0.01);
        assert!(out.join("model.json").exists());
    }

    #[tokio::test]
    async fn test_train_rejects_invalid_configured_value() {
        let dir = TempDir::new().unwrap();
        let config = small_config(dir.path().join("output"));

        let err = train(
            &runner(&config),
            &config,
            None,
            pairs(&[("learning_rate", "0")]),
        )
        .await
        .unwrap_err();
        let code = err.downcast_ref::<TrialError>().map(TrialError::exit_code);
        assert_eq!(code, Some(3));
        assert!(!dir.path().join("output").join("metrics.json").exists());
    }

    #[tokio::test]
    async fn test_run_appends_to_file_collector() {
        let dir = TempDir::new().unwrap();
        let metrics_file = dir.path().join("metrics.log");
        let mut config = small_config(dir.path().join("unused"));
        config.reporting.collector = trialkit_core::config::Collector::File;
        config.reporting.metrics_file = metrics_file.clone();

        run_trial(
            &runner(&config),
            &config,
            Some("trial-7".into()),
            pairs(&[("learning_rate", "0.1"), ("batch_size", "16")]),
        )
        .await
        .unwrap();

        let written = std::fs::read_to_string(&metrics_file).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("accuracy="));
        assert!(lines[1].starts_with("loss="));
    }

    #[tokio::test]
    async fn test_dispatch_reports_missing_config_file() {
        let objective: Arc<dyn Objective> = Arc::new(SoftmaxObjective::new());
        let matches = cli::command(objective.params())
            .try_get_matches_from([
                "trialkit",
                "--config",
                "/nonexistent/trialkit.toml",
                "run",
                "--learning_rate=0.1",
                "--batch_size=8",
            ])
            .unwrap();
        let parsed = Cli::from_arg_matches(&matches).unwrap();

        let err = dispatch(parsed, &matches, objective).await.unwrap_err();
        let code = err.downcast_ref::<TrialError>().map(TrialError::exit_code);
        assert_eq!(code, Some(6));
    }
}
