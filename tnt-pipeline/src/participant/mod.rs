//! The participant level: one graph per T1w scan, run as a forest.
//!
//! Planning does all of the checking. Scans are enumerated and checked for
//! duplicates, options are validated, and every scan's output plan is
//! resolved and checked for collisions. Only when every scan plans cleanly
//! are output directories created, so a configuration error leaves nothing
//! behind. Execution then never raises: failed scans are reported in the
//! [`RunReport`].

mod scan;

pub use scan::{renamed_in_debug_io, scan_graph};

use crate::bids::{BidsDataset, Scan};
use crate::config::{ParticipantOptions, PipelineConfig};
use crate::engine::{ExecutionContext, Executor, NodeHook, Plugin, RunReport, ScanJob};
use crate::errors::PipelineError;
use crate::events::{EventSink, NoOpEventSink};
use crate::graph::WorkflowGraph;
use crate::naming::{OutputPlan, OutputResolver};
use crate::profile::ResourceTable;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Name of the forest holding every scan graph.
pub const PARTICIPANT: &str = "participant";

/// A scan with its outputs and graph.
#[derive(Debug, Clone)]
pub struct PlannedScan {
    /// The input scan.
    pub scan: Scan,
    /// Where its outputs go.
    pub plan: OutputPlan,
    /// Its graph.
    pub graph: WorkflowGraph,
}

impl PlannedScan {
    /// The execution job of this scan.
    #[must_use]
    pub fn job(&self) -> ScanJob {
        ScanJob::new(self.graph.clone(), self.scan.entities.clone(), self.plan.crash_dir())
    }
}

/// Everything a participant run will do, checked before anything runs.
#[derive(Debug, Clone)]
pub struct ParticipantPlan {
    config: PipelineConfig,
    output: PathBuf,
    scans: Vec<PlannedScan>,
}

impl ParticipantPlan {
    /// Enumerates scans of `input` and plans their graphs and outputs below
    /// `output`. Writes nothing.
    pub fn build(input: &Path, output: &Path, options: &ParticipantOptions) -> Result<Self, PipelineError> {
        options.execution.validate()?;
        let config = PipelineConfig::from_request(&options.pipeline)?;
        let dataset = BidsDataset::open(input, !options.skip_bids_validation)?;
        let scans = dataset.find_t1w_scans(&options.filter)?;
        if scans.is_empty() {
            warn!(input = %input.display(), "No T1w scans matched the filter");
        }

        let resolver = OutputResolver::new(output);
        let scans = scans
            .into_iter()
            .map(|scan| {
                let plan = OutputPlan::for_config(&resolver, &config, &scan.entities)?;
                let graph = scan_graph(&config, &plan, &scan, options.debug_io)?;
                Ok(PlannedScan { scan, plan, graph })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        info!(
            scans = scans.len(),
            subcortical = config.subcortical.is_some(),
            icv = config.icv.is_some(),
            debug_io = options.debug_io,
            "Planned participant run"
        );
        Ok(Self {
            config,
            output: output.to_path_buf(),
            scans,
        })
    }

    /// The validated pipeline configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Output folder.
    #[must_use]
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Planned scans, sorted by entities.
    #[must_use]
    pub fn scans(&self) -> &[PlannedScan] {
        &self.scans
    }

    /// Creates the output and crash directories of every scan.
    pub fn create_directories(&self) -> Result<(), PipelineError> {
        for planned in &self.scans {
            planned.plan.create_directories()?;
        }
        Ok(())
    }

    /// The execution jobs, one per scan.
    #[must_use]
    pub fn jobs(&self) -> Vec<ScanJob> {
        self.scans.iter().map(PlannedScan::job).collect()
    }

    /// Graphviz description of the forest, one cluster per scan.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{PARTICIPANT}\" {{");
        for (i, planned) in self.scans.iter().enumerate() {
            let name = planned.graph.name();
            let _ = writeln!(out, "  subgraph \"cluster_{i}\" {{");
            let _ = writeln!(out, "    label=\"{name}\";");
            planned.graph.write_dot_body(&mut out, "    ", &format!("{name}."));
            out.push_str("  }\n");
        }
        out.push_str("}\n");
        out
    }

    /// Writes [`ParticipantPlan::to_dot`] to `path`.
    pub fn write_dot(&self, path: &Path) -> Result<(), PipelineError> {
        std::fs::write(path, self.to_dot())?;
        info!(path = %path.display(), "Wrote graph description");
        Ok(())
    }

    /// Creates the output directories and runs every scan graph.
    pub async fn run(&self, context: ExecutionContext) -> Result<RunReport, PipelineError> {
        self.create_directories()?;
        let jobs = self.jobs();
        Ok(Executor::new(context).run(&jobs).await)
    }
}

/// Scratch space of a run: the configured directory, or a temporary one
/// removed when the run ends.
#[derive(Debug)]
enum WorkDir {
    Given(PathBuf),
    Temporary(tempfile::TempDir),
}

impl WorkDir {
    fn new(configured: Option<&Path>) -> Result<Self, PipelineError> {
        match configured {
            Some(dir) => Ok(Self::Given(dir.to_path_buf())),
            None => Ok(Self::Temporary(tempfile::Builder::new().prefix("tnt-pipeline-").tempdir()?)),
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::Given(dir) => dir,
            Self::Temporary(dir) => dir.path(),
        }
    }
}

/// Options of [`run_participant`] beyond the participant options.
#[derive(Clone)]
pub struct RunHooks {
    /// Node hook of the debug plugin; a dry run when unset.
    pub node_hook: Option<Arc<dyn NodeHook>>,
    /// Receives lifecycle events.
    pub events: Arc<dyn EventSink>,
}

impl Default for RunHooks {
    fn default() -> Self {
        Self {
            node_hook: None,
            events: Arc::new(NoOpEventSink),
        }
    }
}

impl std::fmt::Debug for RunHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHooks")
            .field("node_hook", &self.node_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// Plans and runs the participant level.
///
/// Configuration and resource profile errors are returned before any node
/// runs. Scan failures are only reported; call [`RunReport::check`] to turn
/// them into an error.
pub async fn run_participant(
    input: &Path,
    output: &Path,
    options: &ParticipantOptions,
    hooks: RunHooks,
) -> Result<RunReport, PipelineError> {
    let plan = ParticipantPlan::build(input, output, options)?;
    let execution = &options.execution;
    let resources = execution.resource_file.as_deref().map(ResourceTable::load).transpose()?;

    let work_dir = WorkDir::new(execution.working_directory.as_deref())?;
    let mut context = ExecutionContext::new(work_dir.path().join(PARTICIPANT))
        .with_plugin(Plugin::from_options(execution, hooks.node_hook))
        .with_failure_mode(execution.failure_mode)
        .with_events(hooks.events)
        .with_forest(PARTICIPANT);
    if let Some(table) = resources {
        context = context.with_resources(table);
    }
    info!(work_dir = %work_dir.path().display(), plugin = %execution.plugin, "Running participant level");
    let report = plan.run(context).await;
    drop(work_dir);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SyntheticDataset;

    #[test]
    fn test_plan_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = SyntheticDataset::new(dir.path().join("in")).subject("1", &[]).subject("2", &[("acq", "10")]);
        dataset.write().unwrap();
        let options = ParticipantOptions::default().with_pipeline(dataset.templates(&dir.path().join("templates")).unwrap());
        let out = dir.path().join("out");

        let plan = ParticipantPlan::build(dataset.root(), &out, &options).unwrap();
        assert_eq!(plan.scans().len(), 2);
        assert_eq!(plan.scans()[1].graph.name(), "T1_subject-2_acquisition-10");
        assert!(!out.exists());

        let dot = plan.to_dot();
        assert!(dot.starts_with("digraph \"participant\""));
        assert!(dot.contains("\"T1_subject-1.main.preproc.bet\""));
        assert!(dot.contains("label=\"T1_subject-2_acquisition-10\""));

        plan.create_directories().unwrap();
        assert!(out.join("sub-1").join("anat").is_dir());
        assert!(out.join("logs").join("sub-2").join("sub-2_acq-10").is_dir());
    }

    #[test]
    fn test_invalid_execution_options_fail_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ParticipantOptions::default();
        options.execution.n_procs = Some(0);
        let err = ParticipantPlan::build(&dir.path().join("missing"), dir.path(), &options).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOption(ref m) if m.contains("n_procs")));
    }
}
