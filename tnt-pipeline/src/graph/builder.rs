//! Graph builder with validation.

use super::datum::Datum;
use super::spec::{Edge, NodeSpec, PortRef};
use super::workflow::WorkflowGraph;
use crate::errors::{CycleDetectedError, ErrorInfo, GraphValidationError};
use crate::nodes::IdentityInterface;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Name of the node exposing a stage's inputs.
pub const INPUTSPEC: &str = "inputspec";
/// Name of the node exposing a stage's outputs.
pub const OUTPUTSPEC: &str = "outputspec";

/// Builder for validated workflow graphs.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    name: String,
    nodes: HashMap<String, NodeSpec>,
    node_order: Vec<String>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            node_order: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Creates a builder for a stage with `inputspec` and `outputspec`
    /// identity nodes over the given fields.
    #[must_use]
    pub fn stage(name: impl Into<String>, inputs: &[&str], outputs: &[&str]) -> Self {
        let mut builder = Self::new(name);
        for (node, fields) in [(INPUTSPEC, inputs), (OUTPUTSPEC, outputs)] {
            let spec = NodeSpec::new(node, Arc::new(IdentityInterface::new(fields.iter().copied())));
            builder.node_order.push(spec.name.clone());
            builder.nodes.insert(spec.name.clone(), spec);
        }
        builder
    }

    /// Graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of nodes added so far.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Adds a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is invalid or its name is taken.
    pub fn add_node(&mut self, spec: NodeSpec) -> Result<(), GraphValidationError> {
        spec.validate()?;
        self.insert(spec)
    }

    /// Adds a node, consuming and returning the builder.
    pub fn node(mut self, spec: NodeSpec) -> Result<Self, GraphValidationError> {
        self.add_node(spec)?;
        Ok(self)
    }

    fn insert(&mut self, spec: NodeSpec) -> Result<(), GraphValidationError> {
        if self.nodes.contains_key(&spec.name) {
            return Err(GraphValidationError::new(format!(
                "Node '{}' already exists in '{}'",
                spec.name, self.name
            ))
            .with_nodes(vec![spec.name.clone()])
            .with_error_info(ErrorInfo::new("GRAPH-003-DUPLICATE_NODE", "Duplicate node name")));
        }
        self.node_order.push(spec.name.clone());
        self.nodes.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Embeds a built graph, prefixing its node names with `<graph name>.`.
    pub fn embed(&mut self, graph: &WorkflowGraph) -> Result<(), GraphValidationError> {
        let prefix = graph.name();
        for node in graph.nodes() {
            let mut spec = node.clone();
            spec.name = format!("{prefix}.{}", node.name);
            self.insert(spec)?;
        }
        for edge in graph.edges() {
            self.edges.push(Edge {
                from: PortRef::new(format!("{prefix}.{}", edge.from.node), &edge.from.port),
                to: PortRef::new(format!("{prefix}.{}", edge.to.node), &edge.to.port),
            });
        }
        Ok(())
    }

    /// Connects an output port to an input port.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown nodes or ports, an input that is already
    /// wired or bound, a self loop, or a connection closing a cycle.
    pub fn connect(
        &mut self,
        from: &str,
        from_port: &str,
        to: &str,
        to_port: &str,
    ) -> Result<(), GraphValidationError> {
        let source = self.require_node(from)?;
        if !source.interface.output_ports().iter().any(|p| p == from_port) {
            return Err(unknown_port(from, from_port, "output"));
        }
        let target = self.require_node(to)?;
        if !target.interface.input_ports().iter().any(|p| p.name == to_port) {
            return Err(unknown_port(to, to_port, "input"));
        }
        if from == to {
            return Err(GraphValidationError::new(format!("Node '{from}' cannot feed itself"))
                .with_nodes(vec![from.to_string()])
                .with_error_info(ErrorInfo::new("GRAPH-004-SELF_LOOP", "Self loop")));
        }
        if target.inputs.contains_key(to_port) || self.incoming_port(to, to_port).is_some() {
            return Err(already_wired(to, to_port));
        }

        self.edges.push(Edge {
            from: PortRef::new(from, from_port),
            to: PortRef::new(to, to_port),
        });
        if let Err(cycle) = self.detect_cycles() {
            self.edges.pop();
            return Err(cycle.into());
        }
        Ok(())
    }

    /// Connects several ports between the same pair of nodes.
    pub fn connect_all(
        &mut self,
        from: &str,
        to: &str,
        ports: &[(&str, &str)],
    ) -> Result<(), GraphValidationError> {
        for (from_port, to_port) in ports {
            self.connect(from, from_port, to, to_port)?;
        }
        Ok(())
    }

    /// Binds a value to an unwired input port.
    pub fn set_input(
        &mut self,
        node: &str,
        port: &str,
        value: impl Into<Datum>,
    ) -> Result<(), GraphValidationError> {
        let wired = self.incoming_port(node, port).is_some();
        let spec = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| unknown_node(node))?;
        if !spec.interface.input_ports().iter().any(|p| p.name == port) {
            return Err(unknown_port(node, port, "input"));
        }
        if wired || spec.inputs.contains_key(port) {
            return Err(already_wired(node, port));
        }
        spec.inputs.insert(port.to_string(), value.into());
        Ok(())
    }

    /// Validates required inputs and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is empty or a required input is unset.
    pub fn build(self) -> Result<WorkflowGraph, GraphValidationError> {
        if self.nodes.is_empty() {
            return Err(GraphValidationError::new(format!("Graph '{}' has no nodes", self.name))
                .with_error_info(
                    ErrorInfo::new("GRAPH-005-EMPTY", "Cannot build an empty graph")
                        .with_fix_hint("Add at least one node before building."),
                ));
        }
        for name in &self.node_order {
            let Some(spec) = self.nodes.get(name) else {
                continue;
            };
            for port in spec.interface.input_ports().into_iter().filter(|p| p.required) {
                if !spec.inputs.contains_key(&port.name) && self.incoming_port(name, &port.name).is_none() {
                    return Err(GraphValidationError::new(format!(
                        "Required input '{}' of node '{name}' is not set",
                        port.name
                    ))
                    .with_nodes(vec![name.clone()])
                    .with_error_info(
                        ErrorInfo::new("GRAPH-006-UNSET_INPUT", "Required input is not set")
                            .with_context_entry("port", port.name.clone()),
                    ));
                }
            }
        }
        Ok(WorkflowGraph::new(self.name, self.nodes, self.node_order, self.edges))
    }

    fn require_node(&self, name: &str) -> Result<&NodeSpec, GraphValidationError> {
        self.nodes.get(name).ok_or_else(|| unknown_node(name))
    }

    fn incoming_port(&self, node: &str, port: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.to.node == node && e.to.port == port)
    }

    /// Detects cycles in the dependency graph.
    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut dependencies: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            dependencies
                .entry(edge.to.node.as_str())
                .or_default()
                .push(edge.from.node.as_str());
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();
        for name in &self.node_order {
            if !visited.contains(name.as_str()) {
                if let Some(cycle) = dfs_cycle(name, &dependencies, &mut visited, &mut rec_stack, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }
        Ok(())
    }
}

fn dfs_cycle<'a>(
    node: &'a str,
    dependencies: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(deps) = dependencies.get(node) {
        for dep in deps {
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_cycle(dep, dependencies, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                let start = path.iter().position(|n| n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| (*n).to_string()).collect();
                cycle.push((*dep).to_string());
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}

fn unknown_node(node: &str) -> GraphValidationError {
    GraphValidationError::new(format!("Unknown node '{node}'"))
        .with_nodes(vec![node.to_string()])
        .with_error_info(ErrorInfo::new("GRAPH-002-UNKNOWN_NODE", format!("Node '{node}' not found")))
}

fn unknown_port(node: &str, port: &str, direction: &str) -> GraphValidationError {
    GraphValidationError::new(format!("Node '{node}' has no {direction} port '{port}'"))
        .with_nodes(vec![node.to_string()])
        .with_error_info(
            ErrorInfo::new("GRAPH-002-UNKNOWN_PORT", "Unknown port")
                .with_context_entry("port", port)
                .with_context_entry("direction", direction),
        )
}

fn already_wired(node: &str, port: &str) -> GraphValidationError {
    GraphValidationError::new(format!("Input '{port}' of node '{node}' is already set"))
        .with_nodes(vec![node.to_string()])
        .with_error_info(
            ErrorInfo::new("GRAPH-003-DOUBLE_WIRED", "An input can only have one source")
                .with_context_entry("port", port),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::MergeInterface;

    fn identity(name: &str) -> NodeSpec {
        NodeSpec::new(name, Arc::new(IdentityInterface::new(["x", "y"])))
    }

    #[test]
    fn test_stage_has_spec_nodes() {
        let builder = GraphBuilder::stage("preproc", &["T1"], &["nu"]);
        assert_eq!(builder.node_count(), 2);
        let graph = builder.build().unwrap();
        assert!(graph.node(INPUTSPEC).is_some());
        assert!(graph.node(OUTPUTSPEC).is_some());
    }

    #[test]
    fn test_duplicate_node() {
        let mut builder = GraphBuilder::new("g");
        builder.add_node(identity("a")).unwrap();
        let err = builder.add_node(identity("a")).unwrap_err();
        assert_eq!(err.error_info.unwrap().code, "GRAPH-003-DUPLICATE_NODE");
    }

    #[test]
    fn test_unknown_port() {
        let mut builder = GraphBuilder::new("g").node(identity("a")).unwrap().node(identity("b")).unwrap();
        assert!(builder.connect("a", "nope", "b", "x").is_err());
        assert!(builder.connect("a", "x", "b", "nope").is_err());
        assert!(builder.connect("a", "x", "missing", "x").is_err());
    }

    #[test]
    fn test_double_wired() {
        let mut builder = GraphBuilder::new("g")
            .node(identity("a"))
            .unwrap()
            .node(identity("b"))
            .unwrap()
            .node(identity("c"))
            .unwrap();
        builder.connect("a", "x", "c", "x").unwrap();
        let err = builder.connect("b", "x", "c", "x").unwrap_err();
        assert_eq!(err.error_info.unwrap().code, "GRAPH-003-DOUBLE_WIRED");
        assert!(builder.set_input("c", "x", Datum::file("/x")).is_err());
        builder.set_input("c", "y", Datum::file("/y")).unwrap();
        assert!(builder.connect("a", "y", "c", "y").is_err());
    }

    #[test]
    fn test_self_loop() {
        let mut builder = GraphBuilder::new("g").node(identity("a")).unwrap();
        let err = builder.connect("a", "x", "a", "y").unwrap_err();
        assert_eq!(err.error_info.unwrap().code, "GRAPH-004-SELF_LOOP");
    }

    #[test]
    fn test_cycle_rejected_and_rolled_back() {
        let mut builder = GraphBuilder::new("g");
        for name in ["a", "b", "c"] {
            builder.add_node(identity(name)).unwrap();
        }
        builder.connect("a", "x", "b", "x").unwrap();
        builder.connect("b", "x", "c", "x").unwrap();
        let err = builder.connect("c", "y", "a", "y").unwrap_err();
        assert_eq!(err.error_info.as_ref().unwrap().code, "GRAPH-004-CYCLE");
        assert_eq!(err.nodes.first(), err.nodes.last());
        assert_eq!(err.nodes.len(), 4);
        // the rejected edge is not kept
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_required_input_unset() {
        let builder = GraphBuilder::new("g")
            .node(NodeSpec::new("merge", Arc::new(MergeInterface::new(2))))
            .unwrap();
        let err = builder.build().unwrap_err();
        assert_eq!(err.error_info.unwrap().code, "GRAPH-006-UNSET_INPUT");
    }

    #[test]
    fn test_empty_graph() {
        assert!(GraphBuilder::new("g").build().is_err());
    }

    #[test]
    fn test_embed_prefixes() {
        let mut inner = GraphBuilder::stage("inner", &["x"], &["x"]);
        inner.connect(INPUTSPEC, "x", OUTPUTSPEC, "x").unwrap();
        let inner = inner.build().unwrap();

        let mut outer = GraphBuilder::stage("outer", &["x"], &["x"]);
        outer.embed(&inner).unwrap();
        outer.connect(INPUTSPEC, "x", "inner.inputspec", "x").unwrap();
        outer.connect("inner.outputspec", "x", OUTPUTSPEC, "x").unwrap();
        let graph = outer.build().unwrap();
        assert_eq!(graph.node_count(), 4);
        assert!(graph.node("inner.inputspec").is_some());
        assert_eq!(
            graph.upstream("inner.outputspec").into_iter().collect::<Vec<_>>(),
            vec!["inner.inputspec"]
        );
        assert!(outer_clone_conflict(&inner));
    }

    fn outer_clone_conflict(inner: &WorkflowGraph) -> bool {
        let mut builder = GraphBuilder::new("g");
        builder.embed(inner).unwrap();
        builder.embed(inner).is_err()
    }
}
