//! Per-label statistics.

use crate::errors::GraphValidationError;
use crate::graph::{GraphBuilder, NodeSpec, WorkflowGraph, INPUTSPEC, OUTPUTSPEC};
use crate::labels::LabelSet;
use crate::nodes::{ImageStats, Statistic};
use std::sync::Arc;

/// Input fields.
pub const STATS_INPUTS: [&str; 2] = ["label_file", "in_file"];
/// Output fields.
pub const STATS_OUTPUTS: [&str; 1] = ["stats"];

/// Builds a statistics stage named `name` reporting `stats` for every label
/// of `labels`, keyed by label name.
pub fn stats_graph(name: &str, stats: &[Statistic], labels: LabelSet) -> Result<WorkflowGraph, GraphValidationError> {
    let mut builder = GraphBuilder::stage(name, &STATS_INPUTS, &STATS_OUTPUTS)
        .node(NodeSpec::new("image_stats", Arc::new(ImageStats::new(stats, labels))))?;
    builder.connect_all(INPUTSPEC, "image_stats", &[("label_file", "label_file"), ("in_file", "in_file")])?;
    builder.connect("image_stats", "out_file", OUTPUTSPEC, "stats")?;
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_stage() {
        let labels = LabelSet::from_pairs([(1, "ICV")]).unwrap();
        let graph = stats_graph("icv_stats", &[Statistic::Volume], labels).unwrap();
        assert_eq!(graph.name(), "icv_stats");
        assert_eq!(graph.incoming("image_stats").count(), 2);
    }
}
