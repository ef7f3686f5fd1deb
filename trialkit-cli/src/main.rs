//! trialkit CLI: entry points for tuning trials and standalone training.
//!
//! Standard output carries metric lines only; all logging goes to stderr
//! (and optionally to a JSON log directory).

mod cli;
mod commands;

use clap::FromArgMatches;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use trialkit_core::{Objective, SoftmaxObjective, TrialError};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let objective: Arc<dyn Objective> = Arc::new(SoftmaxObjective::new());
    let matches = cli::command(objective.params()).get_matches();
    let cli = match cli::Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    let _guard = init_tracing(cli.verbose, cli.quiet, cli.log_dir.as_deref());

    match commands::dispatch(cli, &matches, objective).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", error_message(&err));
            ExitCode::from(exit_code(&err))
        }
    }
}

/// One-line diagnostic. Trial errors already embed their cause, so the
/// source chain is not appended.
fn error_message(err: &anyhow::Error) -> String {
    format!("error: {err}")
}

/// Process exit status for a failed command.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<TrialError>()
        .map(TrialError::exit_code)
        .unwrap_or(1)
}

fn init_tracing(verbose: u8, quiet: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let level = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Human-readable layer on stderr; stdout belongs to the metrics collector.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let (json_layer, guard) = match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "trialkit.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}
