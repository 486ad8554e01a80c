//! Execution events.
//!
//! The executor reports scan and node lifecycle changes to an [`EventSink`]
//! handed to it with the run. There is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle events emitted while running a forest of scan graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// The first node of a scan is about to run.
    #[serde(rename = "scan.started")]
    ScanStarted,
    /// A node started.
    #[serde(rename = "node.started")]
    NodeStarted,
    /// A node finished successfully.
    #[serde(rename = "node.completed")]
    NodeCompleted,
    /// A node failed; a crash report was written.
    #[serde(rename = "node.failed")]
    NodeFailed,
    /// A node was skipped by a debug hook.
    #[serde(rename = "node.skipped")]
    NodeSkipped,
    /// Every node of a scan finished.
    #[serde(rename = "scan.completed")]
    ScanCompleted,
    /// A scan stopped with at least one failed node.
    #[serde(rename = "scan.failed")]
    ScanFailed,
}

impl EventKind {
    /// Dotted event type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScanStarted => "scan.started",
            Self::NodeStarted => "node.started",
            Self::NodeCompleted => "node.completed",
            Self::NodeFailed => "node.failed",
            Self::NodeSkipped => "node.skipped",
            Self::ScanCompleted => "scan.completed",
            Self::ScanFailed => "scan.failed",
        }
    }

    /// Returns true for events that end a scan.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ScanCompleted | Self::ScanFailed)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_matches_display() {
        for kind in [
            EventKind::ScanStarted,
            EventKind::NodeStarted,
            EventKind::NodeCompleted,
            EventKind::NodeFailed,
            EventKind::NodeSkipped,
            EventKind::ScanCompleted,
            EventKind::ScanFailed,
        ] {
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{kind}\""));
        }
        assert!(EventKind::ScanFailed.is_terminal());
        assert!(!EventKind::NodeFailed.is_terminal());
    }
}
