//! Configuration for trialkit.
//!
//! Uses `figment` for layered configuration: defaults -> TOML file ->
//! `TRIALKIT_`-prefixed environment variables (`__` separates nested keys,
//! e.g. `TRIALKIT_REPORTING__FORMAT=json`).
//!
//! Hyperparameters of the Trial Runner are NOT configuration; they arrive per
//! trial on the command line. Only the Standalone Trainer reads a fixed set
//! from `[standalone.hyperparameters]`.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::TrialError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrialConfig {
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub training: TrainingContext,
    #[serde(default)]
    pub standalone: StandaloneConfig,
}

/// Where the Trial Runner's metric lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collector {
    /// Lines on standard output, scraped from the trial's log.
    #[default]
    Stdout,
    /// Lines appended to `metrics_file`.
    File,
}

/// Serialized shape of the metric lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsFormat {
    /// One `line_template` line per metric.
    #[default]
    Text,
    /// One JSON object per report with a `timestamp` key.
    Json,
}

/// Metric reporting contract with the tuning controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    #[serde(default)]
    pub collector: Collector,
    #[serde(default)]
    pub format: MetricsFormat,
    /// Must contain `{name}` and `{value}` exactly once.
    #[serde(default = "default_line_template")]
    pub line_template: String,
    #[serde(default = "default_objective_metric")]
    pub objective_metric: String,
    #[serde(default = "default_additional_metrics")]
    pub additional_metrics: Vec<String>,
    #[serde(default = "default_metrics_file")]
    pub metrics_file: PathBuf,
    /// Fixed number of decimals; shortest round-trip formatting when unset.
    #[serde(default)]
    pub precision: Option<usize>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            collector: Collector::default(),
            format: MetricsFormat::default(),
            line_template: default_line_template(),
            objective_metric: default_objective_metric(),
            additional_metrics: default_additional_metrics(),
            metrics_file: default_metrics_file(),
            precision: None,
        }
    }
}

impl ReportingConfig {
    /// Objective metric first, then the additional ones, in configured order.
    pub fn reported_metrics(&self) -> Vec<String> {
        std::iter::once(self.objective_metric.clone())
            .chain(self.additional_metrics.iter().cloned())
            .collect()
    }
}

/// Process-wide training settings passed explicitly to the objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingContext {
    /// Seed used when the trial does not pass one.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Seed of the synthetic dataset; kept fixed so all trials see the same data.
    #[serde(default = "default_data_seed")]
    pub data_seed: u64,
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default = "default_features")]
    pub features: usize,
    #[serde(default = "default_classes")]
    pub classes: usize,
    #[serde(default = "default_class_separation")]
    pub class_separation: f64,
    #[serde(default = "default_cluster_spread")]
    pub cluster_spread: f64,
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
}

impl Default for TrainingContext {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            data_seed: default_data_seed(),
            samples: default_samples(),
            features: default_features(),
            classes: default_classes(),
            class_separation: default_class_separation(),
            cluster_spread: default_cluster_spread(),
            validation_fraction: default_validation_fraction(),
        }
    }
}

/// Batch-mode training without a controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandaloneConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub save_model: bool,
    /// Fresh UUID per run when unset.
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default = "default_standalone_hyperparameters")]
    pub hyperparameters: BTreeMap<String, serde_json::Value>,
}

impl Default for StandaloneConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            save_model: true,
            run_id: None,
            hyperparameters: default_standalone_hyperparameters(),
        }
    }
}

impl StandaloneConfig {
    /// Configured hyperparameters as raw strings, ready for validation.
    pub fn raw_hyperparameters(&self) -> Vec<(String, String)> {
        self.hyperparameters
            .iter()
            .map(|(name, value)| {
                let raw = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), raw)
            })
            .collect()
    }
}

fn default_line_template() -> String {
    "{name}={value}".to_string()
}

fn default_objective_metric() -> String {
    "accuracy".to_string()
}

fn default_additional_metrics() -> Vec<String> {
    vec!["loss".to_string()]
}

fn default_metrics_file() -> PathBuf {
    PathBuf::from("/var/log/katib/metrics.log")
}

fn default_seed() -> u64 {
    42
}

fn default_data_seed() -> u64 {
    7
}

fn default_samples() -> usize {
    1200
}

fn default_features() -> usize {
    8
}

fn default_classes() -> usize {
    3
}

fn default_class_separation() -> f64 {
    2.5
}

fn default_cluster_spread() -> f64 {
    1.0
}

fn default_validation_fraction() -> f64 {
    0.2
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/output")
}

fn default_true() -> bool {
    true
}

fn default_standalone_hyperparameters() -> BTreeMap<String, serde_json::Value> {
    BTreeMap::from([
        ("learning_rate".to_string(), serde_json::json!(0.01)),
        ("batch_size".to_string(), serde_json::json!(32)),
    ])
}

/// Load configuration by merging defaults, an optional TOML file, and the
/// environment.
///
/// An explicitly given file must exist; silently running with defaults would
/// report under the wrong metric contract.
pub fn load_config(file: Option<&Path>) -> Result<TrialConfig, TrialError> {
    let mut figment = Figment::from(Serialized::defaults(TrialConfig::default()));

    if let Some(path) = file {
        if !path.exists() {
            return Err(TrialError::config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    // TRIALKIT_REPORTING__FORMAT, TRIALKIT_TRAINING__SEED, ...
    figment = figment.merge(Env::prefixed("TRIALKIT_").split("__"));

    Ok(figment.extract()?)
}
