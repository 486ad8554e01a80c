//! Scheduling plugins and debug hooks.

use crate::bids::EntityDescriptor;
use crate::config::{ExecutionOptions, PluginKind};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// What the debug plugin knows about a node about to run.
#[derive(Debug, Clone, Copy)]
pub struct NodeInvocation<'a> {
    /// Graph name of the scan.
    pub scan: &'a str,
    /// Node path inside the scan graph.
    pub node: &'a str,
    /// Entities of the scan.
    pub entities: &'a EntityDescriptor,
    /// Interface type name.
    pub interface: &'a str,
}

/// Decision of a [`NodeHook`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookVerdict {
    /// Run the node.
    Run,
    /// Mark the node done without running it; it produces no outputs.
    Skip,
    /// Fail the node with this message.
    Fail(String),
}

/// Called by the debug plugin before every node.
pub trait NodeHook: Send + Sync {
    /// Decides what happens to the node.
    fn on_node(&self, invocation: &NodeInvocation<'_>) -> HookVerdict;
}

impl<F> NodeHook for F
where
    F: Fn(&NodeInvocation<'_>) -> HookVerdict + Send + Sync,
{
    fn on_node(&self, invocation: &NodeInvocation<'_>) -> HookVerdict {
        self(invocation)
    }
}

/// Skips every node: a dry run that only walks the graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRun;

impl NodeHook for DryRun {
    fn on_node(&self, _invocation: &NodeInvocation<'_>) -> HookVerdict {
        HookVerdict::Skip
    }
}

/// How nodes are scheduled.
#[derive(Clone, Default)]
pub enum Plugin {
    /// One node at a time, one scan after another.
    #[default]
    Linear,
    /// Ready nodes of every scan at once within a CPU and memory budget.
    MultiProc {
        /// CPU budget.
        n_procs: usize,
        /// Memory budget in GiB; unlimited when unset.
        memory_gb: Option<f64>,
    },
    /// Like [`Plugin::Linear`], asking the hook before each node.
    Debug(Arc<dyn NodeHook>),
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => f.write_str("Linear"),
            Self::MultiProc { n_procs, memory_gb } => f
                .debug_struct("MultiProc")
                .field("n_procs", n_procs)
                .field("memory_gb", memory_gb)
                .finish(),
            Self::Debug(_) => f.write_str("Debug(..)"),
        }
    }
}

impl Plugin {
    /// Builds the plugin selected by `options`. The debug plugin uses `hook`
    /// or, without one, [`DryRun`].
    #[must_use]
    pub fn from_options(options: &ExecutionOptions, hook: Option<Arc<dyn NodeHook>>) -> Self {
        match options.plugin {
            PluginKind::Linear => Self::Linear,
            PluginKind::MultiProc => Self::MultiProc {
                n_procs: options
                    .n_procs
                    .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, NonZeroUsize::get)),
                memory_gb: options.memory_gb,
            },
            PluginKind::Debug => Self::Debug(hook.unwrap_or_else(|| Arc::new(DryRun))),
        }
    }

    /// The kind of this plugin.
    #[must_use]
    pub const fn kind(&self) -> PluginKind {
        match self {
            Self::Linear => PluginKind::Linear,
            Self::MultiProc { .. } => PluginKind::MultiProc,
            Self::Debug(_) => PluginKind::Debug,
        }
    }

    pub(super) fn hook(&self) -> Option<Arc<dyn NodeHook>> {
        match self {
            Self::Debug(hook) => Some(Arc::clone(hook)),
            _ => None,
        }
    }
}
