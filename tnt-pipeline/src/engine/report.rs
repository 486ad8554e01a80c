//! Run results.

use crate::errors::PipelineError;
use serde::Serialize;
use std::path::PathBuf;

/// One failed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Node path inside the scan graph.
    pub node: String,
    /// Failure class (`tool`, `input`, `output`, `io`, `injected`, `panic`).
    pub kind: String,
    /// Error message.
    pub message: String,
    /// Crash report, when it could be written.
    pub crash_file: Option<PathBuf>,
}

/// What happened to one scan's graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanOutcome {
    /// Graph name of the scan.
    pub scan: String,
    /// Nodes that ran successfully, in completion order.
    pub completed: Vec<String>,
    /// Nodes skipped by a debug hook.
    pub skipped: Vec<String>,
    /// Failed nodes.
    pub failures: Vec<FailureRecord>,
    /// Nodes never started because of a failure.
    pub not_run: usize,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
}

impl ScanOutcome {
    pub(super) fn new(scan: impl Into<String>) -> Self {
        Self {
            scan: scan.into(),
            ..Self::default()
        }
    }

    /// Returns true if no node failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of every scan of a run, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    /// Per-scan outcomes.
    pub scans: Vec<ScanOutcome>,
    /// Wall time in milliseconds.
    pub duration_ms: f64,
}

impl RunReport {
    /// Returns true if every scan succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.scans.iter().all(ScanOutcome::is_success)
    }

    /// Names of the failed scans.
    #[must_use]
    pub fn failed_scans(&self) -> Vec<String> {
        self.scans
            .iter()
            .filter(|s| !s.is_success())
            .map(|s| s.scan.clone())
            .collect()
    }

    /// Looks up a scan.
    #[must_use]
    pub fn scan(&self, name: &str) -> Option<&ScanOutcome> {
        self.scans.iter().find(|s| s.scan == name)
    }

    /// Fails with [`PipelineError::ExecutionFailed`] if any scan failed.
    pub fn check(&self) -> Result<(), PipelineError> {
        let failed_scans = self.failed_scans();
        if failed_scans.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::ExecutionFailed { failed_scans })
        }
    }
}
