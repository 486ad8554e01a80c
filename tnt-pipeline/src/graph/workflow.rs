//! Immutable workflow graphs.

use super::spec::{Edge, NodeSpec};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;

/// A validated directed acyclic graph of nodes.
///
/// Built by [`GraphBuilder`](super::GraphBuilder); never mutated afterwards.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    name: String,
    nodes: HashMap<String, NodeSpec>,
    node_order: Vec<String>,
    edges: Vec<Edge>,
    execution_order: Vec<String>,
}

impl WorkflowGraph {
    pub(crate) fn new(
        name: String,
        nodes: HashMap<String, NodeSpec>,
        node_order: Vec<String>,
        edges: Vec<Edge>,
    ) -> Self {
        let execution_order = topological_sort(&node_order, &edges);
        Self {
            name,
            nodes,
            node_order,
            edges,
            execution_order,
        }
    }

    /// Graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The same graph under another name.
    #[must_use]
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.get(name)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.node_order.iter().filter_map(|n| self.nodes.get(n))
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All edges.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Node names, every node after all of its upstream nodes.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Edges ending at `node`.
    pub fn incoming<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.to.node == node)
    }

    /// Nodes feeding `node`.
    #[must_use]
    pub fn upstream(&self, node: &str) -> BTreeSet<&str> {
        self.edges
            .iter()
            .filter(|e| e.to.node == node)
            .map(|e| e.from.node.as_str())
            .collect()
    }

    /// Nodes fed by `node`.
    #[must_use]
    pub fn downstream(&self, node: &str) -> BTreeSet<&str> {
        self.edges
            .iter()
            .filter(|e| e.from.node == node)
            .map(|e| e.to.node.as_str())
            .collect()
    }

    /// Every node reachable from `node`, excluding itself.
    #[must_use]
    pub fn descendants(&self, node: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![node.to_string()];
        while let Some(current) = stack.pop() {
            for child in self.downstream(&current) {
                if seen.insert(child.to_string()) {
                    stack.push(child.to_string());
                }
            }
        }
        seen
    }

    /// Graphviz description with one cluster per embedded graph prefix.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", self.name);
        self.write_dot_body(&mut out, "  ", "");
        out.push_str("}\n");
        out
    }

    /// Writes nodes and edges, each node id prefixed with `id_prefix`.
    pub(crate) fn write_dot_body(&self, out: &mut String, indent: &str, id_prefix: &str) {
        for node in self.nodes() {
            let _ = writeln!(
                out,
                "{indent}\"{id_prefix}{}\" [label=\"{}\\n({})\"];",
                node.name,
                node.name,
                node.interface.kind()
            );
        }
        let mut pairs: Vec<(&str, &str)> = self
            .edges
            .iter()
            .map(|e| (e.from.node.as_str(), e.to.node.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs.dedup();
        for (from, to) in pairs {
            let _ = writeln!(out, "{indent}\"{id_prefix}{from}\" -> \"{id_prefix}{to}\";");
        }
    }
}

/// Orders nodes so that every node follows its upstream nodes, visiting in
/// insertion order for determinism.
fn topological_sort(node_order: &[String], edges: &[Edge]) -> Vec<String> {
    let mut dependencies: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        dependencies
            .entry(edge.to.node.as_str())
            .or_default()
            .push(edge.from.node.as_str());
    }

    let mut result = Vec::new();
    let mut visited = HashSet::new();
    let mut temp_visited = HashSet::new();

    fn visit<'a>(
        node: &'a str,
        dependencies: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        temp_visited: &mut HashSet<&'a str>,
        result: &mut Vec<String>,
    ) {
        if visited.contains(node) || temp_visited.contains(node) {
            return;
        }
        temp_visited.insert(node);
        if let Some(deps) = dependencies.get(node) {
            for dep in deps {
                visit(dep, dependencies, visited, temp_visited, result);
            }
        }
        temp_visited.remove(node);
        visited.insert(node);
        result.push(node.to_string());
    }

    for name in node_order {
        visit(name, &dependencies, &mut visited, &mut temp_visited, &mut result);
    }
    result
}

#[cfg(test)]
mod tests {
    use crate::graph::GraphBuilder;
    use crate::nodes::IdentityInterface;
    use std::sync::Arc;

    use super::*;

    fn chain() -> WorkflowGraph {
        let mut builder = GraphBuilder::new("chain");
        for name in ["c", "b", "a", "d"] {
            builder
                .add_node(NodeSpec::new(name, Arc::new(IdentityInterface::new(["x"]))))
                .unwrap();
        }
        builder.connect("a", "x", "b", "x").unwrap();
        builder.connect("b", "x", "c", "x").unwrap();
        builder.connect("a", "x", "d", "x").unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_execution_order() {
        let graph = chain();
        let order = graph.execution_order();
        let pos = |n: &str| order.iter().position(|o| o == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
        assert!(pos("a") < pos("d"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_neighbours() {
        let graph = chain();
        assert_eq!(graph.upstream("b").into_iter().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(graph.downstream("a").into_iter().collect::<Vec<_>>(), vec!["b", "d"]);
        let mut desc: Vec<_> = graph.descendants("a").into_iter().collect();
        desc.sort();
        assert_eq!(desc, vec!["b", "c", "d"]);
        assert!(graph.descendants("c").is_empty());
    }

    #[test]
    fn test_neighbours_outlive_the_queried_name() {
        let graph = chain();
        let (upstream, downstream) = {
            let name = String::from("b");
            (graph.upstream(&name), graph.downstream(&name))
        };
        assert_eq!(upstream.into_iter().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(downstream.into_iter().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn test_dot() {
        let dot = chain().to_dot();
        assert!(dot.starts_with("digraph \"chain\" {"));
        assert!(dot.contains("\"a\" -> \"b\";"));
        assert!(dot.contains("(identity)"));
    }
}
