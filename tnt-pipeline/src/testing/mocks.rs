//! Node hooks for the debug plugin.

use crate::engine::{HookVerdict, NodeHook, NodeInvocation};
use parking_lot::Mutex;

/// Fails the nodes of scans with a given acquisition and runs the rest.
#[derive(Debug, Clone)]
pub struct FailingHook {
    acquisition: String,
    node_prefix: Option<String>,
}

impl FailingHook {
    /// Fails every node of scans acquired as `acquisition`.
    #[must_use]
    pub fn on_acquisition(acquisition: impl Into<String>) -> Self {
        Self {
            acquisition: acquisition.into(),
            node_prefix: None,
        }
    }

    /// Only fails nodes whose path starts with `prefix`.
    #[must_use]
    pub fn only_nodes(mut self, prefix: impl Into<String>) -> Self {
        self.node_prefix = Some(prefix.into());
        self
    }
}

impl NodeHook for FailingHook {
    fn on_node(&self, invocation: &NodeInvocation<'_>) -> HookVerdict {
        let scan_matches = invocation.entities.acquisition.as_deref() == Some(self.acquisition.as_str());
        let node_matches = self
            .node_prefix
            .as_deref()
            .map_or(true, |prefix| invocation.node.starts_with(prefix));
        if scan_matches && node_matches {
            HookVerdict::Fail(format!("forced failure of {} in {}", invocation.node, invocation.scan))
        } else {
            HookVerdict::Run
        }
    }
}

/// Records every invocation and lets the node run.
#[derive(Debug, Default)]
pub struct RecordingHook {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingHook {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(scan, node)` of each invocation, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    /// Number of invocations for `scan`.
    #[must_use]
    pub fn count_for_scan(&self, scan: &str) -> usize {
        self.calls.lock().iter().filter(|(s, _)| s == scan).count()
    }
}

impl NodeHook for RecordingHook {
    fn on_node(&self, invocation: &NodeInvocation<'_>) -> HookVerdict {
        self.calls
            .lock()
            .push((invocation.scan.to_string(), invocation.node.to_string()));
        HookVerdict::Run
    }
}
