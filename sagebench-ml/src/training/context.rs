//! Explicit handles passed through the training loop.

use crate::error::MlError;
use sagebench_core::Tracker;
use std::path::Path;
use tracing::Span;

/// Tracker and logging span of one run.
pub struct RunContext<'a> {
    tracker: &'a mut dyn Tracker,
    span: Span,
}

impl<'a> RunContext<'a> {
    pub fn new(tracker: &'a mut dyn Tracker, span: Span) -> Self {
        Self { tracker, span }
    }

    pub fn tracker(&mut self) -> &mut dyn Tracker {
        &mut *self.tracker
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn log_metric(&mut self, name: &str, value: f64, step: usize) -> Result<(), MlError> {
        Ok(self.tracker.log_metric(name, value, step)?)
    }

    pub fn log_artifact(&mut self, path: &Path, artifact_dir: Option<&str>) -> Result<(), MlError> {
        Ok(self.tracker.log_artifact(path, artifact_dir)?)
    }
}
