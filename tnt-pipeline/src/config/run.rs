//! Options of a participant run.

use super::options::PipelineRequest;
use crate::bids::ScanFilter;
use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How nodes are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// One node at a time.
    #[default]
    Linear,
    /// Ready nodes of all scans in parallel under a CPU and memory budget.
    MultiProc,
    /// Nodes are reported, not run.
    Debug,
}

impl FromStr for PluginKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "multiproc" | "multi_proc" => Ok(Self::MultiProc),
            "debug" => Ok(Self::Debug),
            other => Err(PipelineError::InvalidOption(format!("unknown plugin {other:?}"))),
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Linear => "linear",
            Self::MultiProc => "multiproc",
            Self::Debug => "debug",
        })
    }
}

/// What happens to the rest of a scan's graph when one of its nodes fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Start no further nodes of the scan.
    #[default]
    FailFast,
    /// Skip only the nodes depending on the failed one.
    ContinueOnFailure,
}

/// Execution engine options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Scheduling plugin.
    pub plugin: PluginKind,
    /// CPU budget of the multiproc plugin; all cores when unset.
    pub n_procs: Option<usize>,
    /// Memory budget of the multiproc plugin in GiB; unlimited when unset.
    pub memory_gb: Option<f64>,
    /// Scratch directory; a temporary directory when unset.
    pub working_directory: Option<PathBuf>,
    /// Per-node resource table from a profiling run.
    pub resource_file: Option<PathBuf>,
    /// Failure handling within a scan.
    pub failure_mode: FailureMode,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            plugin: PluginKind::Linear,
            n_procs: None,
            memory_gb: None,
            working_directory: None,
            resource_file: None,
            failure_mode: FailureMode::FailFast,
        }
    }
}

impl ExecutionOptions {
    /// Sets the plugin.
    #[must_use]
    pub const fn with_plugin(mut self, plugin: PluginKind) -> Self {
        self.plugin = plugin;
        self
    }

    /// Sets the CPU budget.
    #[must_use]
    pub const fn with_n_procs(mut self, n_procs: usize) -> Self {
        self.n_procs = Some(n_procs);
        self
    }

    /// Sets the memory budget.
    #[must_use]
    pub const fn with_memory_gb(mut self, memory_gb: f64) -> Self {
        self.memory_gb = Some(memory_gb);
        self
    }

    /// Sets the scratch directory.
    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Sets the resource table.
    #[must_use]
    pub fn with_resource_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.resource_file = Some(path.into());
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub const fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.n_procs == Some(0) {
            return Err(PipelineError::InvalidOption("n_procs must be at least 1".into()));
        }
        if let Some(mem) = self.memory_gb {
            if !(mem.is_finite() && mem > 0.0) {
                return Err(PipelineError::InvalidOption(format!("memory_gb must be positive, got {mem}")));
            }
        }
        if let Some(dir) = &self.working_directory {
            if !dir.is_dir() {
                return Err(PipelineError::InvalidOption(format!(
                    "working directory {} does not exist",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

/// Everything a participant run needs besides the input and output folders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantOptions {
    /// Pipeline options, validated into a
    /// [`PipelineConfig`](super::PipelineConfig) before anything runs.
    pub pipeline: PipelineRequest,
    /// Scan selection.
    pub filter: ScanFilter,
    /// Execution options.
    pub execution: ExecutionOptions,
    /// Replace every processing stage by a copy of the input scan.
    pub debug_io: bool,
    /// Do not require `dataset_description.json`.
    pub skip_bids_validation: bool,
}

impl ParticipantOptions {
    /// Loads options from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parses options from JSON text.
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Sets the pipeline options.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineRequest) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Sets the scan filter.
    #[must_use]
    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the execution options.
    #[must_use]
    pub fn with_execution(mut self, execution: ExecutionOptions) -> Self {
        self.execution = execution;
        self
    }

    /// Enables debug-IO.
    #[must_use]
    pub const fn with_debug_io(mut self, debug_io: bool) -> Self {
        self.debug_io = debug_io;
        self
    }

    /// Skips dataset validation.
    #[must_use]
    pub const fn with_skip_bids_validation(mut self, skip: bool) -> Self {
        self.skip_bids_validation = skip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bids::EntityFilter;

    #[test]
    fn test_plugin_from_str() {
        assert_eq!("MultiProc".parse::<PluginKind>().unwrap(), PluginKind::MultiProc);
        assert_eq!("linear".parse::<PluginKind>().unwrap(), PluginKind::Linear);
        assert!("slurm".parse::<PluginKind>().is_err());
        assert_eq!(PluginKind::MultiProc.to_string(), "multiproc");
    }

    #[test]
    fn test_execution_validate() {
        assert!(ExecutionOptions::default().validate().is_ok());
        assert!(ExecutionOptions::default().with_n_procs(0).validate().is_err());
        assert!(ExecutionOptions::default().with_memory_gb(-1.0).validate().is_err());
        let dir = tempfile::tempdir().unwrap();
        assert!(ExecutionOptions::default().with_working_directory(dir.path()).validate().is_ok());
        assert!(ExecutionOptions::default()
            .with_working_directory(dir.path().join("missing"))
            .validate()
            .is_err());
    }

    #[test]
    fn test_options_from_partial_json() {
        let opts = ParticipantOptions::from_json(
            r#"{
                "pipeline": {"model_space": "MNI152", "subcortical": true, "num_threads": 4},
                "filter": {"participant_labels": ["1"], "acquisition": {"mode": "absent"}},
                "execution": {"plugin": "multi_proc", "n_procs": 8, "failure_mode": "continue_on_failure"},
                "debug_io": true
            }"#,
        )
        .unwrap();
        assert_eq!(opts.pipeline.model_space, "MNI152");
        assert!(opts.pipeline.subcortical);
        assert_eq!(opts.pipeline.num_threads, 4);
        assert!((opts.pipeline.preprocess.bet_frac - 0.5).abs() < f64::EPSILON);
        assert_eq!(opts.filter.acquisition, EntityFilter::Absent);
        assert_eq!(opts.execution.plugin, PluginKind::MultiProc);
        assert_eq!(opts.execution.n_procs, Some(8));
        assert_eq!(opts.execution.failure_mode, FailureMode::ContinueOnFailure);
        assert!(opts.debug_io);
        assert!(!opts.skip_bids_validation);
    }

    #[test]
    fn test_options_bad_json() {
        assert!(matches!(
            ParticipantOptions::from_json("{\"debug_io\": 3}"),
            Err(PipelineError::Serialization(_))
        ));
    }
}
