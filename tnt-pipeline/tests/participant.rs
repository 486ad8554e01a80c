//! Participant runs against a synthetic BIDS dataset in debug-IO mode.

use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tnt_pipeline::config::{FailureMode, ParticipantOptions, PipelineRequest, PluginKind};
use tnt_pipeline::errors::PipelineError;
use tnt_pipeline::events::{CollectingEventSink, EventKind};
use tnt_pipeline::participant::{run_participant, ParticipantPlan, RunHooks};
use tnt_pipeline::testing::{
    scan_content, FailingHook, SyntheticDataset, ATLAS_LABELS, SUBCORTICAL_LABELS, TISSUE_LABELS,
};

const COMBINED_LABELS: &str = "index\tname\r\n\
    1\tCSF+frontal\r\n2\tCSF+temporal\r\n3\tCSF+occipital\r\n\
    4\tGM+frontal\r\n5\tGM+temporal\r\n6\tGM+occipital\r\n\
    7\tWM+frontal\r\n8\tWM+temporal\r\n9\tWM+occipital\r\n";

struct Fixture {
    _dir: tempfile::TempDir,
    dataset: SyntheticDataset,
    request: PipelineRequest,
    out: PathBuf,
}

impl Fixture {
    fn new(dataset: impl FnOnce(SyntheticDataset) -> SyntheticDataset) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dataset(SyntheticDataset::new(dir.path().join("bids")));
        dataset.write().unwrap();
        let request = dataset.templates(&dir.path().join("templates")).unwrap();
        let out = dir.path().join("out");
        Self {
            _dir: dir,
            dataset,
            request,
            out,
        }
    }

    fn options(&self) -> ParticipantOptions {
        ParticipantOptions::default()
            .with_pipeline(self.request.clone())
            .with_debug_io(true)
    }
}

fn files(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_file())
        .collect();
    found.sort();
    found
}

fn is_sidecar(path: &Path) -> bool {
    path.to_string_lossy().ends_with("_labels.tsv")
}

fn read(path: PathBuf) -> String {
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()))
}

#[tokio::test]
async fn test_debug_io_produces_every_output() {
    let fixture = Fixture::new(|d| d.subject("1", &[]).subject("2", &[]));
    let report = run_participant(fixture.dataset.root(), &fixture.out, &fixture.options(), RunHooks::default())
        .await
        .unwrap();
    report.check().unwrap();
    assert_eq!(report.scans.len(), 2);

    for stem in fixture.dataset.stems() {
        let subject_dir = fixture.out.join(&stem);
        let anat = files(&subject_dir.join("anat"));
        let xfm = files(&subject_dir.join("xfm"));
        assert_eq!(anat.len(), 16, "{stem}: {anat:?}");
        assert_eq!(anat.iter().filter(|p| is_sidecar(p)).count(), 4);
        assert_eq!(xfm.len(), 3, "{stem}: {xfm:?}");
        assert!(xfm.iter().all(|p| p.extension().is_some_and(|e| e == "h5")));

        for path in anat.iter().chain(&xfm).filter(|p| !is_sidecar(p)) {
            assert_eq!(std::fs::read(path).unwrap(), scan_content(&stem), "{}", path.display());
        }

        let anat_dir = subject_dir.join("anat");
        assert_eq!(read(anat_dir.join(format!("{stem}_space-T1w_desc-tissue_dseg_labels.tsv"))), TISSUE_LABELS);
        assert_eq!(read(anat_dir.join(format!("{stem}_space-T1w_desc-tissue_features_labels.tsv"))), TISSUE_LABELS);
        assert_eq!(read(anat_dir.join(format!("{stem}_space-T1w_desc-SYS808lobes_dseg_labels.tsv"))), ATLAS_LABELS);
        assert_eq!(
            read(anat_dir.join(format!("{stem}_space-T1w_desc-tissuelobes_dseg_labels.tsv"))),
            COMBINED_LABELS
        );
        assert!(fixture.out.join("logs").join(&stem).join(&stem).is_dir());
    }
}

#[tokio::test]
async fn test_debug_io_with_every_branch() {
    let fixture = Fixture::new(|d| d.subject("1", &[("ses", "a")]));
    let mut options = fixture.options();
    options.pipeline.subcortical = true;
    options.pipeline.intracranial_volume = true;

    run_participant(fixture.dataset.root(), &fixture.out, &options, RunHooks::default())
        .await
        .unwrap()
        .check()
        .unwrap();

    let session_dir = fixture.out.join("sub-1").join("ses-a");
    let anat = files(&session_dir.join("anat"));
    assert_eq!(anat.len(), 22);
    assert_eq!(files(&session_dir.join("xfm")).len(), 6);
    assert_eq!(
        read(session_dir.join("anat").join("sub-1_ses-a_space-T1w_desc-subcortexcolinatlas_dseg_labels.tsv")),
        SUBCORTICAL_LABELS
    );
}

#[tokio::test]
async fn test_colliding_outputs_write_nothing() {
    let fixture = Fixture::new(|d| d.subject("1", &[]));
    let mut options = fixture.options();
    options.pipeline.subcortical = true;
    // warped_model and warped_subcortical_model both become desc-subcortexcolin
    options.pipeline.model_space = "subcortexcolin".into();

    let err = run_participant(fixture.dataset.root(), &fixture.out, &options, RunHooks::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateOutputPath { .. }), "{err}");
    assert!(err.is_configuration());
    assert!(!fixture.out.exists());
}

#[tokio::test]
async fn test_branch_without_inputs_fails_before_running() {
    let fixture = Fixture::new(|d| d.subject("1", &[]));
    let events = Arc::new(CollectingEventSink::new());
    let hooks = RunHooks {
        events: events.clone(),
        ..RunHooks::default()
    };

    let mut options = fixture.options();
    options.pipeline.subcortical = true;
    options.pipeline.subcortical_atlas = None;
    let err = run_participant(fixture.dataset.root(), &fixture.out, &options, hooks.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingBranchInput { ref branch, .. } if branch == "--subcortical"));

    let mut options = fixture.options();
    options.pipeline.subcortical = true;
    options.pipeline.subcortical_atlas = Some(fixture.dataset.root().join("unlabeled_atlas.nii.gz"));
    let err = run_participant(fixture.dataset.root(), &fixture.out, &options, hooks.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingLabelFile { ref flag, .. } if flag == "--subcortical-labels"));

    let mut options = fixture.options();
    options.pipeline.intracranial_volume = true;
    options.pipeline.intracranial_mask = None;
    let err = run_participant(fixture.dataset.root(), &fixture.out, &options, hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingBranchInput { ref branch, .. } if branch == "--intracranial-volume"));
    assert!(err.error_info().is_some());

    assert!(events.is_empty());
    assert!(!fixture.out.exists());
}

async fn run_with_one_failing_scan(mode: FailureMode) {
    let fixture = Fixture::new(|d| {
        d.subject("1", &[])
            .subject("2", &[("acq", "bad")])
            .subject("3", &[("acq", "10")])
    });
    let mut options = fixture.options();
    options.execution.plugin = PluginKind::Debug;
    options.execution.failure_mode = mode;
    let events = Arc::new(CollectingEventSink::new());
    let hooks = RunHooks {
        node_hook: Some(Arc::new(FailingHook::on_acquisition("bad"))),
        events: events.clone(),
    };

    let report = run_participant(fixture.dataset.root(), &fixture.out, &options, hooks)
        .await
        .unwrap();

    assert_eq!(report.failed_scans(), vec!["T1_subject-2_acquisition-bad".to_string()]);
    assert!(matches!(report.check(), Err(PipelineError::ExecutionFailed { ref failed_scans }) if failed_scans.len() == 1));
    assert_eq!(events.count_for_scan(EventKind::ScanFailed, "T1_subject-2_acquisition-bad"), 1);

    for stem in ["sub-1", "sub-3_acq-10"] {
        let subject = stem.split('_').next().unwrap();
        let anat = files(&fixture.out.join(subject).join("anat"));
        assert_eq!(anat.len(), 16, "{stem}");
        assert_eq!(files(&fixture.out.join(subject).join("xfm")).len(), 3, "{stem}");
        for path in anat.iter().filter(|p| !is_sidecar(p)) {
            assert_eq!(std::fs::read(path).unwrap(), scan_content(stem));
        }
    }

    let crash_dir = fixture.out.join("logs").join("sub-2").join("sub-2_acq-bad");
    let crashes = files(&crash_dir);
    assert!(!crashes.is_empty());
    assert!(read(crashes[0].clone()).contains("forced failure"));
    assert!(files(&fixture.out.join("sub-2").join("anat")).iter().all(|p| !p.to_string_lossy().contains("T1w.nii")));
}

#[tokio::test]
async fn test_failing_scan_is_isolated_fail_fast() {
    run_with_one_failing_scan(FailureMode::FailFast).await;
}

#[tokio::test]
async fn test_failing_scan_is_isolated_continue_on_failure() {
    run_with_one_failing_scan(FailureMode::ContinueOnFailure).await;
}

#[test]
fn test_graph_description_lists_every_scan() {
    let fixture = Fixture::new(|d| d.subject("1", &[]).subject("2", &[("run", "1")]));
    let mut options = fixture.options();
    options.debug_io = false;
    let plan = ParticipantPlan::build(fixture.dataset.root(), &fixture.out, &options).unwrap();

    let dot_file = fixture.dataset.root().join("graph.dot");
    plan.write_dot(&dot_file).unwrap();
    let dot = read(dot_file);
    assert!(dot.contains("label=\"T1_subject-1\""));
    assert!(dot.contains("label=\"T1_subject-2_run-1\""));
    assert!(dot.contains("\"T1_subject-2_run-1.io_out.writeT1\""));
    assert!(!fixture.out.exists());
}
