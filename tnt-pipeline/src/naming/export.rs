//! The graph copying a scan's results to their planned destinations.

use super::plan::OutputPlan;
use crate::errors::GraphValidationError;
use crate::graph::{GraphBuilder, NodeSpec, WorkflowGraph, INPUTSPEC};
use crate::nodes::{ExportFile, IdentityInterface, WriteFile};
use std::sync::Arc;

/// Name of the export graph inside a scan's graph.
pub const EXPORT_GRAPH: &str = "io_out";

/// Builds the export graph of a plan.
///
/// Its `inputspec` takes one field per planned output. Each field is copied
/// by a `write<field>` node; each label table is written by a
/// `write<field>label` node.
pub fn export_graph(plan: &OutputPlan, check_extension: bool) -> Result<WorkflowGraph, GraphValidationError> {
    let fields: Vec<&str> = plan.outputs().iter().map(|o| o.field.as_str()).collect();
    let mut builder = GraphBuilder::new(EXPORT_GRAPH);
    builder.add_node(NodeSpec::new(INPUTSPEC, Arc::new(IdentityInterface::new(fields))))?;

    let export: Arc<ExportFile> = Arc::new(ExportFile { check_extension });
    for output in plan.outputs() {
        let node = format!("write{}", output.field);
        builder.add_node(NodeSpec::new(&node, export.clone()).with_input("out_file", output.path.clone()))?;
        builder.connect(INPUTSPEC, &output.field, &node, "in_file")?;
    }

    let write: Arc<WriteFile> = Arc::new(WriteFile);
    for sidecar in plan.sidecars() {
        builder.add_node(
            NodeSpec::new(format!("write{}label", sidecar.field), write.clone())
                .with_param("text", sidecar.text.clone())
                .with_input("out_file", sidecar.path.clone()),
        )?;
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bids::EntityDescriptor;
    use crate::graph::Datum;
    use crate::naming::{ArtifactDescriptor, OutputResolver};

    fn plan() -> OutputPlan {
        let outputs = vec![
            ("T1".to_string(), ArtifactDescriptor::new("T1w", "nii.gz")),
            (
                "classified".to_string(),
                ArtifactDescriptor::new("dseg", "nii.gz").space("T1w").desc("tissue"),
            ),
        ];
        let sidecars = vec![(
            "classified".to_string(),
            outputs[1].1.clone(),
            "index\tname\r\n1\tGM\r\n".to_string(),
        )];
        OutputPlan::resolve(&OutputResolver::new("/out"), &EntityDescriptor::new("1"), &outputs, &sidecars).unwrap()
    }

    #[test]
    fn test_export_nodes() {
        let graph = export_graph(&plan(), true).unwrap();
        assert_eq!(graph.name(), EXPORT_GRAPH);
        assert_eq!(graph.node_count(), 4);
        let write = graph.node("writeclassified").unwrap();
        assert_eq!(
            write.inputs["out_file"],
            Datum::file("/out/sub-1/anat/sub-1_space-T1w_desc-tissue_dseg.nii.gz")
        );
        let label = graph.node("writeclassifiedlabel").unwrap();
        assert_eq!(label.interface.kind(), "write_file");
        assert_eq!(
            label.inputs["out_file"],
            Datum::file("/out/sub-1/anat/sub-1_space-T1w_desc-tissue_dseg_labels.tsv")
        );
        assert_eq!(graph.upstream("writeT1").into_iter().collect::<Vec<_>>(), vec![INPUTSPEC]);
    }
}
