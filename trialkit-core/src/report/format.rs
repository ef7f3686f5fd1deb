//! Serialization boundary between [`TrialResult`] and the collector's lines.
//!
//! Everything stringly-typed about the metrics protocol lives here: the line
//! template, metric-name rules, value formatting, and the JSON variant.

use crate::config::{MetricsFormat, ReportingConfig};
use crate::error::ReportingError;
use crate::result::TrialResult;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Names the controller's default filter `([\w|-]+)` captures whole.
static METRIC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w-]+$").expect("valid metric name pattern"));

const NAME_PLACEHOLDER: &str = "{name}";
const VALUE_PLACEHOLDER: &str = "{value}";

/// Validated rendering rules for one trial's report.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFormat {
    format: MetricsFormat,
    template: String,
    metrics: Vec<String>,
    precision: Option<usize>,
}

impl MetricFormat {
    /// Validate the reporting configuration against the metrics the
    /// objective declares.
    pub fn from_config(
        config: &ReportingConfig,
        declared: &[&str],
    ) -> Result<Self, ReportingError> {
        validate_template(&config.line_template)?;

        let metrics = config.reported_metrics();
        for (i, name) in metrics.iter().enumerate() {
            if !METRIC_NAME.is_match(name) {
                return Err(ReportingError::InvalidMetricName { name: name.clone() });
            }
            if metrics[..i].contains(name) {
                return Err(ReportingError::DuplicateMetric { name: name.clone() });
            }
            if !declared.contains(&name.as_str()) {
                return Err(ReportingError::MissingMetric { name: name.clone() });
            }
        }

        Ok(Self {
            format: config.format,
            template: config.line_template.clone(),
            metrics,
            precision: config.precision,
        })
    }

    /// Metric names in report order.
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    fn value(&self, v: f64) -> String {
        match self.precision {
            Some(p) => format!("{v:.p$}"),
            None => format!("{v}"),
        }
    }

    /// Render the complete report, newline-terminated. Nothing is returned
    /// unless every configured metric is present.
    pub fn render(
        &self,
        result: &TrialResult,
        timestamp: DateTime<Utc>,
    ) -> Result<String, ReportingError> {
        let values = self
            .metrics
            .iter()
            .map(|name| {
                result
                    .get(name)
                    .map(|v| (name.as_str(), v))
                    .ok_or_else(|| ReportingError::MissingMetric { name: name.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;

        match self.format {
            MetricsFormat::Text => {
                let mut out = String::new();
                for (name, v) in values {
                    out.push_str(
                        &self
                            .template
                            .replacen(NAME_PLACEHOLDER, name, 1)
                            .replacen(VALUE_PLACEHOLDER, &self.value(v), 1),
                    );
                    out.push('\n');
                }
                Ok(out)
            }
            MetricsFormat::Json => {
                let mut object = serde_json::Map::new();
                for (name, v) in values {
                    object.insert(name.to_string(), serde_json::Value::String(self.value(v)));
                }
                object.insert(
                    "timestamp".to_string(),
                    serde_json::Value::String(
                        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                    ),
                );
                let mut line = serde_json::to_string(&object)?;
                line.push('\n');
                Ok(line)
            }
        }
    }
}

fn validate_template(template: &str) -> Result<(), ReportingError> {
    let invalid = |reason: &str| ReportingError::InvalidTemplate {
        template: template.to_string(),
        reason: reason.to_string(),
    };
    if template.contains(['\n', '\r']) {
        return Err(invalid("must be a single line"));
    }
    if template.matches(NAME_PLACEHOLDER).count() != 1 {
        return Err(invalid("must contain {name} exactly once"));
    }
    if template.matches(VALUE_PLACEHOLDER).count() != 1 {
        return Err(invalid("must contain {value} exactly once"));
    }
    Ok(())
}
