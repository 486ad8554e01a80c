//! Subcortical branch: registration to a second template and transfer of
//! its atlas into native space.

use super::registration::{add_template_registration, RegistrationOptions};
use crate::errors::GraphValidationError;
use crate::graph::{GraphBuilder, WorkflowGraph, INPUTSPEC, OUTPUTSPEC};
use crate::nodes::tools::Interpolation;

/// Stage name.
pub const SUBCORTICAL: &str = "subcortical";
/// Input fields.
pub const SUBCORTICAL_INPUTS: [&str; 5] = ["fixed", "fixed_brain", "moving", "moving_brain_mask", "atlas"];
/// Output fields.
pub const SUBCORTICAL_OUTPUTS: [&str; 5] =
    ["linear_transform", "transform", "inverse_transform", "warped_model", "native_atlas"];

/// Builds the subcortical stage.
pub fn subcortical_graph(options: RegistrationOptions) -> Result<WorkflowGraph, GraphValidationError> {
    let mut builder = GraphBuilder::stage(SUBCORTICAL, &SUBCORTICAL_INPUTS, &SUBCORTICAL_OUTPUTS);
    add_template_registration(&mut builder, options)?;
    builder.add_node(options.resample("tratlas", Interpolation::MultiLabel))?;

    builder.connect(INPUTSPEC, "atlas", "tratlas", "input_image")?;
    builder.connect(INPUTSPEC, "fixed", "tratlas", "reference_image")?;
    builder.connect("nlreg", "composite_transform", "tratlas", "transforms")?;

    builder.connect("linreg", "composite_transform", OUTPUTSPEC, "linear_transform")?;
    builder.connect("nlreg", "composite_transform", OUTPUTSPEC, "transform")?;
    builder.connect("nlreg", "inverse_composite_transform", OUTPUTSPEC, "inverse_transform")?;
    builder.connect("nlreg", "warped_image", OUTPUTSPEC, "warped_model")?;
    builder.connect("tratlas", "output_image", OUTPUTSPEC, "native_atlas")?;
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcortical_stage() {
        let graph = subcortical_graph(RegistrationOptions {
            debug: false,
            num_threads: 2,
        })
        .unwrap();
        assert_eq!(graph.node_count(), 6);
        assert!(graph.descendants("linreg").contains("tratlas"));
        assert_eq!(graph.incoming(OUTPUTSPEC).count(), SUBCORTICAL_OUTPUTS.len());
    }
}
