//! Intracranial volume branch.

use super::registration::RegistrationOptions;
use crate::errors::GraphValidationError;
use crate::graph::{GraphBuilder, WorkflowGraph, INPUTSPEC, OUTPUTSPEC};
use crate::nodes::tools::Interpolation;

/// Stage name.
pub const ICV: &str = "icv";
/// Input fields.
pub const ICV_INPUTS: [&str; 3] = ["nu_bet", "transform", "intracranial_mask"];
/// Output fields.
pub const ICV_OUTPUTS: [&str; 1] = ["native_intracranial_mask"];

/// Builds the stage moving the template intracranial mask into native space.
pub fn icv_graph(options: RegistrationOptions) -> Result<WorkflowGraph, GraphValidationError> {
    let mut builder = GraphBuilder::stage(ICV, &ICV_INPUTS, &ICV_OUTPUTS);
    builder.add_node(options.resample("tricv", Interpolation::NearestNeighbor))?;
    builder.connect(INPUTSPEC, "intracranial_mask", "tricv", "input_image")?;
    builder.connect(INPUTSPEC, "nu_bet", "tricv", "reference_image")?;
    builder.connect(INPUTSPEC, "transform", "tricv", "transforms")?;
    builder.connect("tricv", "output_image", OUTPUTSPEC, "native_intracranial_mask")?;
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icv_stage() {
        let graph = icv_graph(RegistrationOptions {
            debug: false,
            num_threads: 1,
        })
        .unwrap();
        assert_eq!(graph.execution_order(), &[INPUTSPEC, "tricv", OUTPUTSPEC]);
        assert_eq!(graph.node("tricv").unwrap().interface.kind(), "apply_transforms");
    }
}
