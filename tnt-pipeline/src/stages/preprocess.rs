//! Bias correction, intensity normalization and brain extraction.

use super::convert::{to_mnc_graph, to_nii_gz_graph};
use crate::config::PreprocessParams;
use crate::errors::GraphValidationError;
use crate::graph::{GraphBuilder, NodeSpec, WorkflowGraph, INPUTSPEC, OUTPUTSPEC};
use crate::nodes::tools::{ApplyMask, Bet, INormalize, Mnc2Nii, NuCorrect};
use crate::nodes::CommandInterface;

/// Stage name.
pub const PREPROCESS: &str = "preproc";
/// Input fields.
pub const PREPROCESS_INPUTS: [&str; 1] = ["T1"];
/// Output fields.
pub const PREPROCESS_OUTPUTS: [&str; 5] = ["nu_bet", "nu", "normalized", "brain_mask", "normalized_brain"];

/// Builds the preprocessing stage.
///
/// The brain mask is computed on the normalized head and applied to both the
/// bias corrected and the normalized image afterwards, so normalization
/// statistics cover the whole head.
pub fn preprocess_graph(params: &PreprocessParams) -> Result<WorkflowGraph, GraphValidationError> {
    let mut builder = GraphBuilder::stage(PREPROCESS, &PREPROCESS_INPUTS, &PREPROCESS_OUTPUTS);
    builder.embed(&to_mnc_graph("to_mnc")?)?;
    builder.embed(&to_nii_gz_graph("nuc_mnc_to_nii", Mnc2Nii::default(), params.max_shear_angle)?)?;
    builder.embed(&to_nii_gz_graph("inorm_mnc_to_nii", Mnc2Nii::default(), params.max_shear_angle)?)?;
    builder.add_node(NodeSpec::new("nu_correct", CommandInterface::shared(NuCorrect)))?;
    builder.add_node(NodeSpec::new(
        "inorm",
        CommandInterface::shared(INormalize {
            const2: params.inormalize_const2,
            range: params.inormalize_range,
        }),
    ))?;
    builder.add_node(NodeSpec::new(
        "bet",
        CommandInterface::shared(Bet {
            frac: params.bet_frac,
            vertical_gradient: params.bet_vertical_gradient,
        }),
    ))?;
    builder.add_node(NodeSpec::new("mask", CommandInterface::shared(ApplyMask)))?;
    builder.add_node(NodeSpec::new("masknormalized", CommandInterface::shared(ApplyMask)))?;

    builder.connect(INPUTSPEC, "T1", "to_mnc.inputspec", "in_file")?;
    builder.connect("to_mnc.outputspec", "out_file", "nu_correct", "in_file")?;
    builder.connect("nu_correct", "out_file", "inorm", "in_file")?;
    builder.connect("nu_correct", "out_file", "nuc_mnc_to_nii.inputspec", "in_file")?;
    builder.connect("inorm", "out_file", "inorm_mnc_to_nii.inputspec", "in_file")?;
    builder.connect("inorm_mnc_to_nii.outputspec", "out_file", "bet", "in_file")?;

    builder.connect("nuc_mnc_to_nii.outputspec", "out_file", "mask", "in_file")?;
    builder.connect("bet", "mask_file", "mask", "mask_file")?;
    builder.connect("inorm_mnc_to_nii.outputspec", "out_file", "masknormalized", "in_file")?;
    builder.connect("bet", "mask_file", "masknormalized", "mask_file")?;

    builder.connect("mask", "out_file", OUTPUTSPEC, "nu_bet")?;
    builder.connect("nuc_mnc_to_nii.outputspec", "out_file", OUTPUTSPEC, "nu")?;
    builder.connect("inorm_mnc_to_nii.outputspec", "out_file", OUTPUTSPEC, "normalized")?;
    builder.connect("bet", "mask_file", OUTPUTSPEC, "brain_mask")?;
    builder.connect("masknormalized", "out_file", OUTPUTSPEC, "normalized_brain")?;
    builder.build()
}
