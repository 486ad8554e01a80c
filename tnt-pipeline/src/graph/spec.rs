//! Node specifications and edges.

use super::datum::{Datum, PortValues};
use crate::errors::{ErrorInfo, GraphValidationError};
use crate::nodes::Interface;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Memory hint given to nodes that do not declare one, in GiB.
pub const DEFAULT_MEM_GB: f64 = 0.25;

/// One end of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    /// Node name.
    pub node: String,
    /// Port name.
    pub port: String,
}

impl PortRef {
    /// Creates a port reference.
    #[must_use]
    pub fn new(node: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.port)
    }
}

/// A data edge from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Producing port.
    pub from: PortRef,
    /// Consuming port.
    pub to: PortRef,
}

/// Scheduling hints of a node. Hints, not limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceHints {
    /// CPUs the node expects to use.
    pub n_procs: usize,
    /// Memory ceiling in GiB.
    pub mem_gb: f64,
    /// The CPU count is passed to the tool explicitly and must not be
    /// overridden.
    #[serde(default)]
    pub threads_pinned: bool,
}

impl Default for ResourceHints {
    fn default() -> Self {
        Self {
            n_procs: 1,
            mem_gb: DEFAULT_MEM_GB,
            threads_pinned: false,
        }
    }
}

/// A node of a workflow graph.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Node name, unique within its graph.
    pub name: String,
    /// The work the node does.
    pub interface: Arc<dyn Interface>,
    /// Values bound directly to input ports.
    pub inputs: PortValues,
    /// Scheduling hints.
    pub resources: ResourceHints,
}

impl NodeSpec {
    /// Creates a node.
    #[must_use]
    pub fn new(name: impl Into<String>, interface: Arc<dyn Interface>) -> Self {
        let resources = ResourceHints {
            threads_pinned: interface.takes_threads(),
            ..ResourceHints::default()
        };
        Self {
            name: name.into(),
            interface,
            inputs: PortValues::new(),
            resources,
        }
    }

    /// Binds a value to an input port.
    #[must_use]
    pub fn with_input(mut self, port: impl Into<String>, value: impl Into<Datum>) -> Self {
        self.inputs.insert(port.into(), value.into());
        self
    }

    /// Binds a parameter to an input port.
    #[must_use]
    pub fn with_param(mut self, port: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.inputs.insert(port.into(), Datum::Param(value.into()));
        self
    }

    /// Sets the memory hint.
    #[must_use]
    pub const fn with_mem_gb(mut self, mem_gb: f64) -> Self {
        self.resources.mem_gb = mem_gb;
        self
    }

    /// Sets the CPU hint of a node whose tool is told its thread count.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.resources.n_procs = threads;
        self.resources.threads_pinned = true;
        self
    }

    /// Validates the node on its own.
    pub fn validate(&self) -> Result<(), GraphValidationError> {
        if self.name.is_empty() || self.name.contains('.') {
            return Err(GraphValidationError::new(format!(
                "Invalid node name '{}'",
                self.name
            ))
            .with_nodes(vec![self.name.clone()])
            .with_error_info(
                ErrorInfo::new("GRAPH-001-NODE_NAME", "Node names must be non-empty and contain no '.'")
                    .with_fix_hint("Dots separate embedded graphs; use underscores instead."),
            ));
        }
        let declared = self.interface.input_ports();
        if let Some(port) = self
            .inputs
            .keys()
            .find(|port| !declared.iter().any(|d| &d.name == *port))
        {
            return Err(GraphValidationError::new(format!(
                "Node '{}' has no input port '{port}'",
                self.name
            ))
            .with_nodes(vec![self.name.clone()])
            .with_error_info(ErrorInfo::new("GRAPH-002-UNKNOWN_PORT", "Unknown port")));
        }
        Ok(())
    }
}
