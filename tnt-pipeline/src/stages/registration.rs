//! Template registration: affine initialization followed by nonlinear
//! registration, plus carrying the classifier training points and the
//! template brain mask into native space.

use crate::errors::GraphValidationError;
use crate::graph::{GraphBuilder, NodeSpec, WorkflowGraph, INPUTSPEC, OUTPUTSPEC};
use crate::nodes::tools::{
    AntsRegistration, ApplyMask, ApplyTransforms, ApplyTransformsToPoints, Interpolation, RegistrationKind,
};
use crate::nodes::{CommandInterface, ConvertPoints, PointFormat};
use std::sync::Arc;

/// Stage name.
pub const REGISTRATION: &str = "ants";
/// Input fields.
pub const REGISTRATION_INPUTS: [&str; 5] = ["fixed", "fixed_brain", "moving", "moving_brain_mask", "tags"];
/// Output fields.
pub const REGISTRATION_OUTPUTS: [&str; 6] = [
    "trminctags",
    "linear_transform",
    "transform",
    "inverse_transform",
    "warped_model",
    "transformed_model_brain_mask",
];

/// Registration settings shared by every registering stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationOptions {
    /// Single iteration per level.
    pub debug: bool,
    /// Threads of the registration and resampling tools.
    pub num_threads: usize,
}

impl RegistrationOptions {
    pub(super) fn registration(self, kind: RegistrationKind) -> NodeSpec {
        let name = match kind {
            RegistrationKind::Affine => "linreg",
            RegistrationKind::Syn => "nlreg",
        };
        NodeSpec::new(
            name,
            CommandInterface::shared(AntsRegistration {
                kind,
                debug: self.debug,
                num_threads: self.num_threads,
            }),
        )
        .with_threads(self.num_threads)
    }

    pub(super) fn resample(self, name: &str, interpolation: Interpolation) -> NodeSpec {
        NodeSpec::new(
            name,
            CommandInterface::shared(ApplyTransforms {
                interpolation,
                num_threads: self.num_threads,
            }),
        )
        .with_threads(self.num_threads)
    }
}

/// Adds `model_brain`, `linreg` and `nlreg` to a stage whose `inputspec`
/// has `fixed`, `fixed_brain`, `moving` and `moving_brain_mask`.
///
/// The affine step aligns the skull-stripped images and seeds the nonlinear
/// step, which aligns the whole heads.
pub(super) fn add_template_registration(
    builder: &mut GraphBuilder,
    options: RegistrationOptions,
) -> Result<(), GraphValidationError> {
    builder.add_node(NodeSpec::new("model_brain", CommandInterface::shared(ApplyMask)))?;
    builder.add_node(options.registration(RegistrationKind::Affine))?;
    builder.add_node(options.registration(RegistrationKind::Syn))?;

    builder.connect_all(INPUTSPEC, "model_brain", &[("moving", "in_file"), ("moving_brain_mask", "mask_file")])?;
    builder.connect(INPUTSPEC, "fixed_brain", "linreg", "fixed_image")?;
    builder.connect("model_brain", "out_file", "linreg", "moving_image")?;
    builder.connect(INPUTSPEC, "fixed", "nlreg", "fixed_image")?;
    builder.connect(INPUTSPEC, "moving", "nlreg", "moving_image")?;
    builder.connect("linreg", "composite_transform", "nlreg", "initial_moving_transform")?;
    Ok(())
}

/// Builds the main registration stage.
pub fn registration_graph(options: RegistrationOptions) -> Result<WorkflowGraph, GraphValidationError> {
    let mut builder = GraphBuilder::stage(REGISTRATION, &REGISTRATION_INPUTS, &REGISTRATION_OUTPUTS);
    add_template_registration(&mut builder, options)?;

    builder.add_node(NodeSpec::new(
        "converttags",
        Arc::new(ConvertPoints {
            out_format: PointFormat::Ants,
        }),
    ))?;
    builder.add_node(
        NodeSpec::new(
            "trpoints",
            CommandInterface::shared(ApplyTransformsToPoints {
                num_threads: options.num_threads,
            }),
        )
        .with_threads(options.num_threads),
    )?;
    builder.add_node(NodeSpec::new(
        "converttags2",
        Arc::new(ConvertPoints {
            out_format: PointFormat::Minc,
        }),
    ))?;
    builder.add_node(options.resample("trbrain", Interpolation::NearestNeighbor))?;

    // points move through the inverse of the image transform
    builder.connect(INPUTSPEC, "tags", "converttags", "in_file")?;
    builder.connect("converttags", "out_file", "trpoints", "input_file")?;
    builder.connect("nlreg", "inverse_composite_transform", "trpoints", "transforms")?;
    builder.connect("trpoints", "output_file", "converttags2", "in_file")?;

    builder.connect(INPUTSPEC, "moving_brain_mask", "trbrain", "input_image")?;
    builder.connect(INPUTSPEC, "fixed", "trbrain", "reference_image")?;
    builder.connect("nlreg", "composite_transform", "trbrain", "transforms")?;

    builder.connect("converttags2", "out_file", OUTPUTSPEC, "trminctags")?;
    builder.connect("linreg", "composite_transform", OUTPUTSPEC, "linear_transform")?;
    builder.connect("nlreg", "composite_transform", OUTPUTSPEC, "transform")?;
    builder.connect("nlreg", "inverse_composite_transform", OUTPUTSPEC, "inverse_transform")?;
    builder.connect("nlreg", "warped_image", OUTPUTSPEC, "warped_model")?;
    builder.connect("trbrain", "output_image", OUTPUTSPEC, "transformed_model_brain_mask")?;
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RegistrationOptions {
        RegistrationOptions {
            debug: false,
            num_threads: 4,
        }
    }

    #[test]
    fn test_affine_seeds_nonlinear() {
        let graph = registration_graph(options()).unwrap();
        let seed = graph
            .incoming("nlreg")
            .find(|e| e.to.port == "initial_moving_transform")
            .unwrap();
        assert_eq!(seed.from.node, "linreg");
        assert_eq!(seed.from.port, "composite_transform");
        assert_eq!(graph.upstream("linreg").into_iter().collect::<Vec<_>>(), vec![INPUTSPEC, "model_brain"]);
    }

    #[test]
    fn test_thread_hints_pinned() {
        let graph = registration_graph(options()).unwrap();
        for name in ["linreg", "nlreg", "trbrain", "trpoints"] {
            let hints = graph.node(name).unwrap().resources;
            assert_eq!(hints.n_procs, 4, "{name}");
            assert!(hints.threads_pinned, "{name}");
        }
        assert!(!graph.node("converttags").unwrap().resources.threads_pinned);
    }

    #[test]
    fn test_points_use_inverse() {
        let graph = registration_graph(options()).unwrap();
        let transforms = graph.incoming("trpoints").find(|e| e.to.port == "transforms").unwrap();
        assert_eq!(transforms.from.port, "inverse_composite_transform");
    }
}
