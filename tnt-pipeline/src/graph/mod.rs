//! Workflow graph model.
//!
//! Graphs are described once by a [`GraphBuilder`], validated, and frozen
//! into a [`WorkflowGraph`] that the engine executes. Stages are graphs of
//! their own, embedded into the main graph under a name prefix.

mod builder;
mod datum;
mod spec;
mod workflow;

pub use builder::{GraphBuilder, INPUTSPEC, OUTPUTSPEC};
pub use datum::{Datum, PortValues};
pub use spec::{Edge, NodeSpec, PortRef, ResourceHints, DEFAULT_MEM_GB};
pub use workflow::WorkflowGraph;
