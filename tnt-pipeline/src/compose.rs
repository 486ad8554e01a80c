//! Composition of the stages into the main graph of one scan.
//!
//! The fields exposed by the main graph come from
//! [`PipelineConfig::field_set`]; the output plan and debug-IO wiring use the
//! same function, so the three always agree.

use crate::config::{InputField, OutputField, PipelineConfig};
use crate::errors::PipelineError;
use crate::graph::{GraphBuilder, NodeSpec, WorkflowGraph, INPUTSPEC, OUTPUTSPEC};
use crate::labels::LabelSet;
use crate::nodes::{ForceQForm, Statistic};
use crate::stages::{
    classify_graph, icv_graph, preprocess_graph, registration_graph, segment_graph, stats_graph, subcortical_graph,
    RegistrationOptions, CLASSIFY, ICV, PREPROCESS, REGISTRATION, SEGMENT, SUBCORTICAL,
};
use std::sync::Arc;
use tracing::debug;

/// Name of the main graph.
pub const MAIN: &str = "main";

/// Name of the node forcing a qform onto the raw scan.
pub const FORCE_QFORM_T1: &str = "forceqc_T1";

const VOLUME_AND_MEAN: [Statistic; 2] = [Statistic::Volume, Statistic::Mean];

fn single_label(name: &str) -> Result<LabelSet, PipelineError> {
    LabelSet::from_pairs([(1, name)]).map_err(|e| PipelineError::malformed_labels(name, None, e.to_string()))
}

fn port(stage: &str, node: &str) -> String {
    format!("{stage}.{node}")
}

/// Builds the main graph for `config`.
///
/// Optional branches are only added when enabled, and the graph's
/// `inputspec`/`outputspec` carry exactly the fields of
/// [`PipelineConfig::field_set`]. Every output field is wired exactly once.
pub fn main_graph(config: &PipelineConfig) -> Result<WorkflowGraph, PipelineError> {
    let fields = config.field_set();
    let options = RegistrationOptions {
        debug: config.debug,
        num_threads: config.num_threads,
    };
    let max_shear_angle = config.preprocess.max_shear_angle;

    let mut builder = GraphBuilder::stage(MAIN, &fields.input_names(), &fields.output_names());
    builder.add_node(NodeSpec::new(
        FORCE_QFORM_T1,
        Arc::new(ForceQForm::new(max_shear_angle).with_out_name("T1_qform.nii.gz")),
    ))?;
    builder.embed(&preprocess_graph(&config.preprocess)?)?;
    builder.embed(&registration_graph(options)?)?;
    builder.embed(&classify_graph(max_shear_angle)?)?;
    builder.embed(&segment_graph(config.labels.combination.clone(), options)?)?;
    builder.embed(&stats_graph("stats", &VOLUME_AND_MEAN, config.labels.combined())?)?;
    builder.embed(&stats_graph("brainstats", &VOLUME_AND_MEAN, single_label("brain")?)?)?;

    let pp_out = port(PREPROCESS, OUTPUTSPEC);
    let ants_in = port(REGISTRATION, INPUTSPEC);
    let ants_out = port(REGISTRATION, OUTPUTSPEC);
    let classify_in = port(CLASSIFY, INPUTSPEC);
    let classify_out = port(CLASSIFY, OUTPUTSPEC);
    let segment_in = port(SEGMENT, INPUTSPEC);
    let segment_out = port(SEGMENT, OUTPUTSPEC);

    builder.connect(INPUTSPEC, InputField::T1.name(), FORCE_QFORM_T1, "in_file")?;
    builder.connect(FORCE_QFORM_T1, "out_file", OUTPUTSPEC, OutputField::T1.name())?;
    builder.connect(FORCE_QFORM_T1, "out_file", &port(PREPROCESS, INPUTSPEC), "T1")?;

    builder.connect_all(
        INPUTSPEC,
        &ants_in,
        &[
            ("model", "moving"),
            ("model_brain_mask", "moving_brain_mask"),
            ("tags", "tags"),
        ],
    )?;
    builder.connect_all(&pp_out, &ants_in, &[("normalized", "fixed"), ("normalized_brain", "fixed_brain")])?;

    builder.connect_all(&pp_out, &classify_in, &[("nu_bet", "nu_bet"), ("brain_mask", "brain_mask")])?;
    builder.connect(&ants_out, "trminctags", &classify_in, "trminctags")?;

    builder.connect(&ants_out, "transform", &segment_in, "transform")?;
    builder.connect(&classify_out, "classified", &segment_in, "classified")?;
    builder.connect(INPUTSPEC, "atlas", &segment_in, "atlas")?;

    builder.connect(&segment_out, "segmented", "stats.inputspec", "label_file")?;
    builder.connect(&pp_out, "nu", "stats.inputspec", "in_file")?;
    builder.connect(&ants_out, "transformed_model_brain_mask", "brainstats.inputspec", "label_file")?;
    builder.connect(&pp_out, "nu", "brainstats.inputspec", "in_file")?;

    builder.connect_all(
        &pp_out,
        OUTPUTSPEC,
        &[("nu", "nu"), ("normalized", "normalized"), ("brain_mask", "brain_mask")],
    )?;
    builder.connect_all(
        &ants_out,
        OUTPUTSPEC,
        &[
            ("linear_transform", "linear_transform"),
            ("transform", "transform"),
            ("inverse_transform", "inverse_transform"),
            ("warped_model", "warped_model"),
            ("transformed_model_brain_mask", "transformed_model_brain_mask"),
        ],
    )?;
    builder.connect_all(&classify_out, OUTPUTSPEC, &[("classified", "classified"), ("features", "features")])?;
    builder.connect_all(
        &segment_out,
        OUTPUTSPEC,
        &[("segmented", "segmented"), ("transformed_atlas", "transformed_atlas")],
    )?;
    builder.connect("stats.outputspec", "stats", OUTPUTSPEC, "stats")?;
    builder.connect("brainstats.outputspec", "stats", OUTPUTSPEC, "brainstats")?;

    if let Some(subcortical) = &config.subcortical {
        builder.embed(&subcortical_graph(options)?)?;
        builder.embed(&stats_graph("subcortical_stats", &VOLUME_AND_MEAN, subcortical.labels.clone())?)?;
        let sub_in = port(SUBCORTICAL, INPUTSPEC);
        let sub_out = port(SUBCORTICAL, OUTPUTSPEC);

        builder.connect_all(
            INPUTSPEC,
            &sub_in,
            &[
                ("subcortical_model", "moving"),
                ("subcortical_model_brain_mask", "moving_brain_mask"),
                ("subcortical_atlas", "atlas"),
            ],
        )?;
        builder.connect_all(&pp_out, &sub_in, &[("normalized", "fixed"), ("normalized_brain", "fixed_brain")])?;
        builder.connect_all(
            &sub_out,
            OUTPUTSPEC,
            &[
                ("linear_transform", "subcortical_linear_transform"),
                ("transform", "subcortical_transform"),
                ("inverse_transform", "subcortical_inverse_transform"),
                ("warped_model", "warped_subcortical_model"),
                ("native_atlas", "native_subcortical_atlas"),
            ],
        )?;
        builder.connect(&sub_out, "native_atlas", "subcortical_stats.inputspec", "label_file")?;
        builder.connect(&pp_out, "nu", "subcortical_stats.inputspec", "in_file")?;
        builder.connect("subcortical_stats.outputspec", "stats", OUTPUTSPEC, "subcortical_stats")?;
    }

    if config.icv.is_some() {
        builder.embed(&icv_graph(options)?)?;
        builder.embed(&stats_graph("icv_stats", &[Statistic::Volume], single_label("ICV")?)?)?;
        let icv_in = port(ICV, INPUTSPEC);
        let icv_out = port(ICV, OUTPUTSPEC);

        builder.connect(INPUTSPEC, "intracranial_mask", &icv_in, "intracranial_mask")?;
        builder.connect(&pp_out, "nu_bet", &icv_in, "nu_bet")?;
        builder.connect(&ants_out, "transform", &icv_in, "transform")?;
        builder.connect(&icv_out, "native_intracranial_mask", OUTPUTSPEC, "native_intracranial_mask")?;
        builder.connect(&icv_out, "native_intracranial_mask", "icv_stats.inputspec", "label_file")?;
        builder.connect(&pp_out, "nu", "icv_stats.inputspec", "in_file")?;
        builder.connect("icv_stats.outputspec", "stats", OUTPUTSPEC, "icv_stats")?;
    }

    let graph = builder.build()?;
    debug!(
        nodes = graph.node_count(),
        subcortical = config.subcortical.is_some(),
        icv = config.icv.is_some(),
        "Composed main graph"
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Branches, IcvBranch, PipelineLabels, SubcorticalBranch, TemplateSet};
    use std::collections::BTreeSet;

    fn config(branches: Branches) -> PipelineConfig {
        let tissue = LabelSet::from_pairs([(1, "GM"), (2, "WM")]).unwrap();
        let atlas = LabelSet::from_pairs([(1, "frontal"), (2, "temporal")]).unwrap();
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

    #[test]
    fn test_outputs_wired_once_for_every_branch_combination() {
        for branches in Branches::all() {
            let config = config(branches);
            let graph = main_graph(&config).unwrap();
            let wired: Vec<&str> = graph.incoming(OUTPUTSPEC).map(|e| e.to.port.as_str()).collect();
            let unique: BTreeSet<&str> = wired.iter().copied().collect();
            assert_eq!(wired.len(), unique.len(), "{branches:?}");
            let expected: BTreeSet<&str> = config.field_set().output_names().into_iter().collect();
            assert_eq!(unique, expected, "{branches:?}");
        }
    }

    #[test]
    fn test_branch_nodes_only_when_enabled() {
        let base = main_graph(&config(Branches::default())).unwrap();
        assert!(base.node("subcortical.nlreg").is_none());
        assert!(base.node("icv.tricv").is_none());

        let full = main_graph(&config(Branches {
            subcortical: true,
            icv: true,
        }))
        .unwrap();
        assert!(full.node("subcortical.nlreg").is_some());
        assert!(full.node("icv.tricv").is_some());
        assert!(full.node_count() > base.node_count());
    }

    #[test]
    fn test_raw_scan_goes_through_qform() {
        let graph = main_graph(&config(Branches::default())).unwrap();
        assert_eq!(
            graph.upstream("preproc.inputspec").into_iter().collect::<Vec<_>>(),
            vec![FORCE_QFORM_T1]
        );
        assert_eq!(graph.execution_order().first().map(String::as_str), Some(INPUTSPEC));
    }

    #[test]
    fn test_stats_follow_segmentation() {
        let graph = main_graph(&config(Branches::default())).unwrap();
        assert!(graph.descendants("segment_lobes.combinelabels").contains("stats.image_stats"));
        assert!(graph.descendants("ants.trbrain").contains("brainstats.image_stats"));
        assert!(!graph.descendants("classify.classify").contains("brainstats.image_stats"));
    }

    #[test]
    fn test_icv_uses_main_transform() {
        let graph = main_graph(&config(Branches {
            subcortical: false,
            icv: true,
        }))
        .unwrap();
        let edge = graph.incoming("icv.inputspec").find(|e| e.to.port == "transform").unwrap();
        assert_eq!(edge.from.node, "ants.outputspec");
    }
}
