//! Lobe segmentation: the atlas is brought into native space and combined
//! with the tissue map.

use super::registration::RegistrationOptions;
use crate::errors::GraphValidationError;
use crate::graph::{GraphBuilder, NodeSpec, WorkflowGraph, INPUTSPEC, OUTPUTSPEC};
use crate::labels::LabelCombination;
use crate::nodes::tools::Interpolation;
use crate::nodes::{CombineLabels, MergeInterface};
use std::sync::Arc;

/// Stage name.
pub const SEGMENT: &str = "segment_lobes";
/// Input fields.
pub const SEGMENT_INPUTS: [&str; 3] = ["classified", "transform", "atlas"];
/// Output fields.
pub const SEGMENT_OUTPUTS: [&str; 2] = ["segmented", "transformed_atlas"];

/// Builds the lobe segmentation stage. Voxel pairs are mapped through
/// `combination`, the same table the combined label file is written from.
pub fn segment_graph(
    combination: LabelCombination,
    options: RegistrationOptions,
) -> Result<WorkflowGraph, GraphValidationError> {
    let mut builder = GraphBuilder::stage(SEGMENT, &SEGMENT_INPUTS, &SEGMENT_OUTPUTS);
    builder.add_node(options.resample("tratlas", Interpolation::MultiLabel))?;
    builder.add_node(NodeSpec::new("labelsmerge", Arc::new(MergeInterface::new(2))))?;
    builder.add_node(NodeSpec::new("combinelabels", Arc::new(CombineLabels::new(combination))))?;

    builder.connect(INPUTSPEC, "atlas", "tratlas", "input_image")?;
    builder.connect(INPUTSPEC, "classified", "tratlas", "reference_image")?;
    builder.connect(INPUTSPEC, "transform", "tratlas", "transforms")?;
    builder.connect(INPUTSPEC, "classified", "labelsmerge", "in1")?;
    builder.connect("tratlas", "output_image", "labelsmerge", "in2")?;
    builder.connect("labelsmerge", "out", "combinelabels", "label_files")?;

    builder.connect("combinelabels", "out_file", OUTPUTSPEC, "segmented")?;
    builder.connect("tratlas", "output_image", OUTPUTSPEC, "transformed_atlas")?;
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelSet;

    #[test]
    fn test_segment_stage() {
        let tissue = LabelSet::from_pairs([(1, "GM")]).unwrap();
        let atlas = LabelSet::from_pairs([(1, "frontal")]).unwrap();
        let options = RegistrationOptions {
            debug: true,
            num_threads: 1,
        };
        let graph = segment_graph(tissue.combine(&atlas), options).unwrap();
        assert_eq!(
            graph.execution_order(),
            &[INPUTSPEC, "tratlas", "labelsmerge", "combinelabels", OUTPUTSPEC]
        );
    }
}
