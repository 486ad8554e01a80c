//! Properties that must hold for every configuration.

use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use tnt_pipeline::bids::EntityDescriptor;
use tnt_pipeline::compose::main_graph;
use tnt_pipeline::config::{Branches, IcvBranch, PipelineConfig, PipelineLabels, SubcorticalBranch, TemplateSet};
use tnt_pipeline::graph::OUTPUTSPEC;
use tnt_pipeline::labels::LabelSet;
use tnt_pipeline::naming::{first_duplicate, OutputPlan, OutputResolver};

fn config(branches: Branches) -> PipelineConfig {
    let tissue = LabelSet::from_pairs([(1, "CSF"), (2, "GM"), (3, "WM")]).unwrap();
    let atlas = LabelSet::from_pairs([(1, "frontal"), (2, "temporal")]).unwrap();
    let mut config = PipelineConfig::new(PipelineLabels::new(tissue, atlas), TemplateSet::default());
    if branches.subcortical {
        config = config.with_subcortical(SubcorticalBranch {
            model: "/templates/colin.nii.gz".into(),
            model_space: "colin".into(),
            model_brain_mask: "/templates/colin_mask.nii.gz".into(),
            atlas: "/templates/colin_atlas.nii.gz".into(),
            labels: LabelSet::from_pairs([(10, "thalamus"), (11, "putamen")]).unwrap(),
        });
    }
    if branches.icv {
        config = config.with_icv(IcvBranch {
            mask: "/templates/icv.nii.gz".into(),
        });
    }
    config
}

fn entity_grid() -> Vec<EntityDescriptor> {
    let mut grid = Vec::new();
    for subject in ["1", "02", "abc"] {
        for session in [None, Some("pre")] {
            for acquisition in [None, Some("10")] {
                for run in [None, Some("2")] {
                    let mut e = EntityDescriptor::new(subject);
                    if let Some(s) = session {
                        e = e.with_session(s);
                    }
                    if let Some(a) = acquisition {
                        e = e.with_acquisition(a);
                    }
                    if let Some(r) = run {
                        e = e.with_run(r);
                    }
                    grid.push(e);
                }
            }
        }
    }
    grid
}

#[test]
fn test_paths_unique_within_and_across_scans() {
    let resolver = OutputResolver::new("/out");
    for branches in Branches::all() {
        let config = config(branches);
        let mut all = BTreeSet::new();
        for entities in entity_grid() {
            let plan = OutputPlan::for_config(&resolver, &config, &entities).unwrap();
            assert_eq!(first_duplicate(plan.paths()), None, "{branches:?} {entities}");
            for path in plan.paths() {
                assert!(all.insert(path.to_path_buf()), "{} shared between scans", path.display());
            }
        }
    }
}

#[test]
fn test_naming_and_composition_agree_on_fields() {
    let resolver = OutputResolver::new("/out");
    let entities = EntityDescriptor::new("1");
    for branches in Branches::all() {
        let config = config(branches);
        let plan = OutputPlan::for_config(&resolver, &config, &entities).unwrap();
        let planned: BTreeSet<&str> = plan.outputs().iter().map(|o| o.field.as_str()).collect();

        let graph = main_graph(&config).unwrap();
        let declared: BTreeSet<&str> = graph.incoming(OUTPUTSPEC).map(|e| e.to.port.as_str()).collect();

        assert_eq!(planned, declared, "{branches:?}");
        assert_eq!(planned.len(), config.field_set().outputs.len());
        assert!(plan.sidecars().iter().all(|s| planned.contains(s.field.as_str())));
    }
}

#[test]
fn test_label_round_trip() {
    let sets = [
        LabelSet::new(),
        LabelSet::from_pairs([(1, "GM"), (2, "WM")]).unwrap(),
        LabelSet::from_pairs([(7, "left hippocampus"), (3, "CSF"), (100, "a+b")]).unwrap(),
    ];
    for set in sets {
        let text = set.to_tsv();
        assert_eq!(LabelSet::parse(&text, "round trip").unwrap(), set);
    }
    assert_eq!(
        LabelSet::from_pairs([(1, "GM"), (2, "WM")]).unwrap().to_tsv(),
        "index\tname\r\n1\tGM\r\n2\tWM\r\n"
    );
}

#[test]
fn test_label_names_round_trip_or_are_rejected() {
    let kept = ["Hippocampus (ünilateral)", "a+b", "CSF+frontal", "left  hippocampus", "Ω"];
    for name in kept {
        let set = LabelSet::from_pairs([(1, name)]).unwrap();
        let parsed = LabelSet::parse(&set.to_tsv(), "names").unwrap();
        assert_eq!(parsed, set, "{name:?}");
        assert_eq!(parsed.get(1), Some(name));
    }

    let rejected = ["", " ", " GM", "WM ", "\tGM", "G\nM", "\u{a0}CSF"];
    for name in rejected {
        let mut set = LabelSet::new();
        assert!(set.push(1, name).is_err(), "{name:?} accepted");
        assert!(set.is_empty());
    }

    let tissue = LabelSet::from_pairs([(1, "grey matter"), (2, "Hippocampus (ünilateral)")]).unwrap();
    let atlas = LabelSet::from_pairs([(5, "a+b")]).unwrap();
    let combined = tissue.combine(&atlas).labels();
    assert_eq!(LabelSet::parse(&combined.to_tsv(), "combined").unwrap(), combined);
    assert_eq!(combined.get(2), Some("Hippocampus (ünilateral)+a+b"));
}

#[test]
fn test_combination_is_deterministic() {
    let tissue = LabelSet::from_pairs([(1, "GM"), (2, "WM")]).unwrap();
    let atlas = LabelSet::from_pairs([(1, "frontal"), (2, "temporal"), (3, "occipital")]).unwrap();

    let first = tissue.combine(&atlas);
    let second = tissue.combine(&atlas);
    assert_eq!(first, second);
    assert_eq!(first.labels().to_tsv(), second.labels().to_tsv());

    let indices: Vec<u32> = first.labels().iter().map(|l| l.index).collect();
    assert_eq!(indices, (1..=6).collect::<Vec<_>>());
    assert_eq!(first.labels().get(4), Some("WM+frontal"));
    assert_eq!(first.lookup(2, 3), Some(6));
}
