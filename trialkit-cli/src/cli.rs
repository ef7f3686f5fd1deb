//! Command-line surface.
//!
//! Global options and subcommands are derived; hyperparameter flags are
//! generated at runtime from the objective's declared [`ParamSpec`]s so the
//! accepted names and types always match what the objective validates.

use clap::{Arg, ArgAction, ArgMatches, CommandFactory, Parser};
use std::path::PathBuf;
use trialkit_core::{ParamKind, ParamSpec};

const HYPERPARAMETER_HEADING: &str = "Hyperparameters";

/// trialkit: run one hyperparameter-tuning trial and report its metrics
#[derive(Parser, Debug)]
#[command(name = "trialkit", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "TRIALKIT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Directory for JSON log files (disabled when unset)
    #[arg(long, env = "TRIALKIT_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run one tuning trial and print its metrics for the controller's collector
    Run {
        /// Trial identifier used in logs (defaults to a fresh UUID)
        #[arg(long, env = "TRIALKIT_TRIAL_NAME")]
        trial_name: Option<String>,
    },
    /// Train with configured hyperparameters and write metrics to an output directory
    Train {
        /// Output directory (overrides standalone.output_dir)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

/// Full command with one flag per declared hyperparameter on both subcommands.
pub fn command(params: &[ParamSpec]) -> clap::Command {
    let args: Vec<Arg> = params.iter().map(hyperparameter_arg).collect();
    Cli::command()
        .mut_subcommand("run", |cmd| cmd.args(args.clone()))
        .mut_subcommand("train", |cmd| cmd.args(args))
}

fn hyperparameter_arg(spec: &ParamSpec) -> Arg {
    let value_name = match spec.kind {
        ParamKind::Float { .. } => "FLOAT",
        ParamKind::Int { .. } => "INT",
        ParamKind::Categorical { .. } => "CHOICE",
    };
    let mut help = format!("{} {}", spec.help, spec.kind.domain());
    if spec.required {
        help.push_str(" [required]");
    } else if let Some(default) = &spec.default {
        help.push_str(&format!(" [default: {default}]"));
    }

    let mut arg = Arg::new(spec.name)
        .long(spec.name)
        .env(spec.name.to_uppercase())
        .value_name(value_name)
        .help(help)
        .help_heading(HYPERPARAMETER_HEADING)
        // Negative values must reach validation instead of parsing as flags.
        .allow_negative_numbers(true)
        .action(ArgAction::Set);
    let dashed = spec.name.replace('_', "-");
    if dashed != spec.name {
        arg = arg.visible_alias(dashed);
    }
    arg
}

/// Raw `(name, value)` pairs for every hyperparameter present on the command
/// line or in the environment, in declaration order.
pub fn hyperparameters(matches: &ArgMatches, params: &[ParamSpec]) -> Vec<(String, String)> {
    params
        .iter()
        .filter_map(|spec| {
            matches
                .get_one::<String>(spec.name)
                .map(|value| (spec.name.to_string(), value.clone()))
        })
        .collect()
}
