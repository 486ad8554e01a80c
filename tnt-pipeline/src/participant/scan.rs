//! The graph of one scan: the main graph, or its debug-IO stand-in, feeding
//! the export graph.

use crate::bids::Scan;
use crate::compose::{main_graph, MAIN};
use crate::config::{InputField, OutputField, PipelineConfig};
use crate::errors::PipelineError;
use crate::graph::{GraphBuilder, NodeSpec, WorkflowGraph, INPUTSPEC, OUTPUTSPEC};
use crate::naming::{export_graph, OutputPlan, EXPORT_GRAPH};
use crate::nodes::Rename;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Template or scan file bound to `field`.
fn input_value(config: &PipelineConfig, scan: &Scan, field: InputField) -> Option<PathBuf> {
    let templates = &config.templates;
    let subcortical = config.subcortical.as_ref();
    match field {
        InputField::T1 => Some(scan.path.clone()),
        InputField::Model => Some(templates.model.clone()),
        InputField::Tags => Some(templates.tags.clone()),
        InputField::Atlas => Some(templates.atlas.clone()),
        InputField::ModelBrainMask => Some(templates.model_brain_mask.clone()),
        InputField::SubcorticalModel => subcortical.map(|s| s.model.clone()),
        InputField::SubcorticalAtlas => subcortical.map(|s| s.atlas.clone()),
        InputField::SubcorticalModelBrainMask => subcortical.map(|s| s.model_brain_mask.clone()),
        InputField::IntracranialMask => config.icv.as_ref().map(|i| i.mask.clone()),
    }
}

fn renamer(extension: &str) -> Result<Arc<Rename>, PipelineError> {
    Rename::nifti_to(extension)
        .map(Arc::new)
        .map_err(|e| PipelineError::InvalidOption(format!("rename pattern: {e}")))
}

/// Builds the graph of one scan, named after its entities.
///
/// Normally the main graph runs on the scan and each of its outputs feeds
/// the export node of the same field. With `debug_io` no processing node
/// exists: image outputs are copies of the input scan, and transforms and
/// tables are copies renamed to `.h5` and `.tsv`.
pub fn scan_graph(
    config: &PipelineConfig,
    plan: &OutputPlan,
    scan: &Scan,
    debug_io: bool,
) -> Result<WorkflowGraph, PipelineError> {
    let fields = config.field_set();
    let export_in = format!("{EXPORT_GRAPH}.{INPUTSPEC}");
    let mut builder = GraphBuilder::new(scan.entities.graph_name());
    builder.embed(&export_graph(plan, !debug_io)?)?;

    if debug_io {
        let to_h5 = renamer("h5")?;
        let to_tsv = renamer("tsv")?;
        for field in &fields.outputs {
            let rename = match field {
                f if f.is_transform() => Some(Arc::clone(&to_h5)),
                f if f.is_table() => Some(Arc::clone(&to_tsv)),
                _ => None,
            };
            match rename {
                Some(rename) => {
                    let node = format!("rename_{}", field.name());
                    builder.add_node(NodeSpec::new(&node, rename).with_input("in_file", scan.path.clone()))?;
                    builder.connect(&node, "out_file", &export_in, field.name())?;
                }
                None => builder.set_input(&export_in, field.name(), scan.path.clone())?,
            }
        }
    } else {
        builder.embed(&main_graph(config)?)?;
        let main_in = format!("{MAIN}.{INPUTSPEC}");
        let main_out = format!("{MAIN}.{OUTPUTSPEC}");
        for field in &fields.inputs {
            if let Some(path) = input_value(config, scan, *field) {
                builder.set_input(&main_in, field.name(), path)?;
            }
        }
        for field in &fields.outputs {
            builder.connect(&main_out, field.name(), &export_in, field.name())?;
        }
    }

    let graph = builder.build()?;
    debug!(
        scan = graph.name(),
        nodes = graph.node_count(),
        debug_io,
        "Built scan graph"
    );
    Ok(graph)
}

/// Output fields whose debug-IO stand-in is renamed rather than copied.
#[must_use]
pub fn renamed_in_debug_io(field: OutputField) -> bool {
    field.is_transform() || field.is_table()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bids::EntityDescriptor;
    use crate::config::{Branches, IcvBranch, PipelineLabels, SubcorticalBranch, TemplateSet};
    use crate::graph::Datum;
    use crate::labels::LabelSet;
    use crate::naming::OutputResolver;

    fn config(branches: Branches) -> PipelineConfig {
        let tissue = LabelSet::from_pairs([(1, "GM"), (2, "WM")]).unwrap();
        let atlas = LabelSet::from_pairs([(1, "frontal")]).unwrap();
        let mut config = PipelineConfig::new(PipelineLabels::new(tissue, atlas), TemplateSet::default());
        if branches.subcortical {
            config = config.with_subcortical(SubcorticalBranch {
                model: "/t/colin.nii.gz".into(),
                model_space: "colin".into(),
                model_brain_mask: "/t/colin_mask.nii.gz".into(),
                atlas: "/t/colin_atlas.nii.gz".into(),
                labels: LabelSet::from_pairs([(10, "thalamus")]).unwrap(),
            });
        }
        if branches.icv {
            config = config.with_icv(IcvBranch {
                mask: "/t/icv.nii.gz".into(),
            });
        }
        config
    }

    fn scan() -> Scan {
        Scan {
            path: "/data/sub-1/anat/sub-1_acq-10_T1w.nii.gz".into(),
            entities: EntityDescriptor::new("1").with_acquisition("10"),
        }
    }

    fn plan(config: &PipelineConfig) -> OutputPlan {
        OutputPlan::for_config(&OutputResolver::new("/out"), config, &scan().entities).unwrap()
    }

    #[test]
    fn test_main_outputs_reach_export() {
        for branches in Branches::all() {
            let config = config(branches);
            let graph = scan_graph(&config, &plan(&config), &scan(), false).unwrap();
            assert_eq!(graph.name(), "T1_subject-1_acquisition-10");
            let exported: Vec<&str> = graph.incoming("io_out.inputspec").map(|e| e.to.port.as_str()).collect();
            assert_eq!(exported, config.field_set().output_names(), "{branches:?}");
            assert!(graph.incoming("io_out.inputspec").all(|e| e.from.node == "main.outputspec"));
        }
    }

    #[test]
    fn test_main_inputs_bound() {
        let config = config(Branches {
            subcortical: true,
            icv: true,
        });
        let graph = scan_graph(&config, &plan(&config), &scan(), false).unwrap();
        let inputs = &graph.node("main.inputspec").unwrap().inputs;
        assert_eq!(inputs["T1"], Datum::file("/data/sub-1/anat/sub-1_acq-10_T1w.nii.gz"));
        assert_eq!(inputs["subcortical_atlas"], Datum::file("/t/colin_atlas.nii.gz"));
        assert_eq!(inputs["intracranial_mask"], Datum::file("/t/icv.nii.gz"));
        assert_eq!(inputs.len(), config.field_set().inputs.len());
    }

    #[test]
    fn test_debug_io_has_no_processing() {
        let config = config(Branches {
            subcortical: true,
            icv: false,
        });
        let graph = scan_graph(&config, &plan(&config), &scan(), true).unwrap();
        assert!(graph.nodes().all(|n| !n.name.starts_with("main.")));

        let renamed: Vec<&str> = graph
            .nodes()
            .filter(|n| n.name.starts_with("rename_"))
            .map(|n| n.name.as_str())
            .collect();
        let expected = config.field_set().outputs.into_iter().filter(|f| renamed_in_debug_io(*f)).count();
        assert_eq!(renamed.len(), expected);
        assert_eq!(graph.node("rename_transform").unwrap().interface.kind(), "rename");

        let export_in = &graph.node("io_out.inputspec").unwrap().inputs;
        assert_eq!(export_in["classified"], Datum::file("/data/sub-1/anat/sub-1_acq-10_T1w.nii.gz"));
        assert!(!export_in.contains_key("stats"));
    }
}
