//! Reporting sinks: where a finished trial's result goes.
//!
//! The Trial Runner reports to the controller's metrics collector
//! ([`StreamCollector`] for stdout, [`FileCollector`] for a metrics file);
//! the Standalone Trainer reports to an output directory
//! ([`crate::artifact::ArtifactSink`]).

pub mod format;

pub use format::MetricFormat;

use crate::error::ReportingError;
use crate::hyperparams::HyperparameterSet;
use crate::objective::Evaluation;
use crate::persistence;
use chrono::{DateTime, Utc};
use std::io::{self, Write};
use std::path::PathBuf;

/// Everything a sink may persist about one finished trial.
#[derive(Debug, Clone, Copy)]
pub struct Report<'a> {
    pub run_id: &'a str,
    pub objective: &'a str,
    pub fingerprint: &'a str,
    pub hyperparameters: &'a HyperparameterSet,
    pub evaluation: &'a Evaluation,
    pub finished_at: DateTime<Utc>,
}

/// Destination of a trial's result.
///
/// `report` is called at most once, and only after training succeeded. An
/// implementation must either deliver the whole result or return an error;
/// a partially delivered result is indistinguishable from a failed trial.
pub trait MetricSink: Send {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Check the destination before any training time is spent.
    fn prepare(&mut self) -> Result<(), ReportingError> {
        Ok(())
    }

    fn report(&mut self, report: &Report<'_>) -> Result<(), ReportingError>;
}

/// Collector that writes metric lines to a stream, normally stdout.
pub struct StreamCollector<W> {
    out: W,
    format: MetricFormat,
}

impl StreamCollector<io::Stdout> {
    pub fn stdout(format: MetricFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write + Send> StreamCollector<W> {
    pub fn new(out: W, format: MetricFormat) -> Self {
        Self { out, format }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> MetricSink for StreamCollector<W> {
    fn describe(&self) -> String {
        format!("stream collector ({} metrics)", self.format.metrics().len())
    }

    fn report(&mut self, report: &Report<'_>) -> Result<(), ReportingError> {
        let rendered = self
            .format
            .render(&report.evaluation.result, report.finished_at)?;
        // One write, then flush: the result counts only once flushed.
        self.out.write_all(rendered.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

/// Collector that appends metric lines to a file the controller tails.
pub struct FileCollector {
    path: PathBuf,
    format: MetricFormat,
}

impl FileCollector {
    pub fn new(path: impl Into<PathBuf>, format: MetricFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

impl MetricSink for FileCollector {
    fn describe(&self) -> String {
        format!("file collector {}", self.path.display())
    }

    fn prepare(&mut self) -> Result<(), ReportingError> {
        persistence::append_synced(&self.path, b"").map_err(|source| {
            ReportingError::OutputNotWritable {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn report(&mut self, report: &Report<'_>) -> Result<(), ReportingError> {
        let rendered = self
            .format
            .render(&report.evaluation.result, report.finished_at)?;
        persistence::append_synced(&self.path, rendered.as_bytes())?;
        Ok(())
    }
}
