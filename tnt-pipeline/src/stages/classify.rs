//! Tissue classification and feature extraction.

use super::convert::{to_mnc_graph, to_nii_gz_graph};
use crate::errors::GraphValidationError;
use crate::graph::{GraphBuilder, NodeSpec, WorkflowGraph, INPUTSPEC, OUTPUTSPEC};
use crate::nodes::tools::{Classify, Mnc2Nii};
use crate::nodes::{CommandInterface, Csv2Tsv};
use std::sync::Arc;

/// Stage name.
pub const CLASSIFY: &str = "classify";
/// Input fields.
pub const CLASSIFY_INPUTS: [&str; 3] = ["nu_bet", "brain_mask", "trminctags"];
/// Output fields.
pub const CLASSIFY_OUTPUTS: [&str; 2] = ["classified", "features"];

/// Builds the classification stage.
pub fn classify_graph(max_shear_angle: f64) -> Result<WorkflowGraph, GraphValidationError> {
    let mut builder = GraphBuilder::stage(CLASSIFY, &CLASSIFY_INPUTS, &CLASSIFY_OUTPUTS);
    builder.embed(&to_mnc_graph("to_mnc")?)?;
    builder.embed(&to_mnc_graph("to_mnc_brain_mask")?)?;
    builder.embed(&to_nii_gz_graph(
        "mnc2nii",
        Mnc2Nii {
            write_byte: true,
            write_unsigned: true,
        },
        max_shear_angle,
    )?)?;
    builder.add_node(NodeSpec::new(
        "classify",
        CommandInterface::shared(Classify { dump_features: false }),
    ))?;
    builder.add_node(NodeSpec::new(
        "extract_features",
        CommandInterface::shared(Classify { dump_features: true }),
    ))?;
    builder.add_node(NodeSpec::new("convert_features", Arc::new(Csv2Tsv::new(["value", "index"]))))?;

    builder.connect(INPUTSPEC, "nu_bet", "to_mnc.inputspec", "in_file")?;
    builder.connect(INPUTSPEC, "brain_mask", "to_mnc_brain_mask.inputspec", "in_file")?;
    for node in ["classify", "extract_features"] {
        builder.connect("to_mnc.outputspec", "out_file", node, "in_file")?;
        builder.connect("to_mnc_brain_mask.outputspec", "out_file", node, "mask_file")?;
        builder.connect(INPUTSPEC, "trminctags", node, "tag_file")?;
    }
    builder.connect("classify", "out_file", "mnc2nii.inputspec", "in_file")?;
    builder.connect("extract_features", "features", "convert_features", "in_file")?;

    builder.connect("mnc2nii.outputspec", "out_file", OUTPUTSPEC, "classified")?;
    builder.connect("convert_features", "out_file", OUTPUTSPEC, "features")?;
    builder.build()
}
