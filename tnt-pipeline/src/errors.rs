//! Error types for the pipeline.
//!
//! Errors fall into three classes. Configuration errors are detected before
//! any node runs and abort the whole invocation. Resource-profile errors are
//! raised while loading scheduling overrides. Execution errors are collected
//! per scan and only surface at the end of a run as [`PipelineError::ExecutionFailed`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No label file was given and the convention-derived file does not exist.
    #[error(
        "No label file for {} specified and {} does not exist. Use {flag} to specify a label file",
        base.display(),
        expected.display()
    )]
    MissingLabelFile {
        /// The image the labels describe.
        base: PathBuf,
        /// The convention-derived label path that was tried.
        expected: PathBuf,
        /// The option that would have supplied the label file.
        flag: String,
    },

    /// A label table could not be parsed.
    #[error("Malformed label file {source_name}{}: {reason}", line.map(|l| format!(" (line {l})")).unwrap_or_default())]
    MalformedLabelFile {
        /// File path or other description of where the text came from.
        source_name: String,
        /// One-based line number, when the problem is tied to a line.
        line: Option<usize>,
        /// What went wrong.
        reason: String,
    },

    /// A descriptor set cannot satisfy the naming template.
    #[error("{0}")]
    UnbuildablePath(#[from] UnbuildablePathError),

    /// Two artifacts of one scan resolved to the same path.
    #[error("Duplicate output files detected! {}", path.display())]
    DuplicateOutputPath {
        /// The path that was produced more than once.
        path: PathBuf,
    },

    /// Two enumerated scans share entities or a source path.
    #[error("Duplicate scan: {0}")]
    DuplicateScan(String),

    /// A branch flag was set without the input it depends on.
    #[error("{branch} was requested but {missing} was not specified")]
    MissingBranchInput {
        /// The optional branch (`subcortical`, `intracranial_volume`).
        branch: String,
        /// The missing paired input.
        missing: String,
    },

    /// An option value or combination of options is not valid.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// A workflow graph failed validation.
    #[error("{0}")]
    Graph(#[from] GraphValidationError),

    /// The resource profile could not be loaded.
    #[error("Resource profile error: {0}")]
    ResourceProfile(String),

    /// One or more scans failed during execution.
    #[error("{} scan(s) failed: {}", failed_scans.len(), failed_scans.join(", "))]
    ExecutionFailed {
        /// Graph names of the failed scans.
        failed_scans: Vec<String>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An image could not be read or written.
    #[error("Image error: {0}")]
    Image(String),

    /// A statistics table could not be read during group aggregation.
    #[error("Malformed statistics table {}: {reason}", path.display())]
    MalformedStatsTable {
        /// The table.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
}

impl PipelineError {
    /// Creates a malformed label file error.
    #[must_use]
    pub fn malformed_labels(
        source_name: impl Into<String>,
        line: Option<usize>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedLabelFile {
            source_name: source_name.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Creates a missing branch input error.
    #[must_use]
    pub fn missing_branch_input(branch: impl Into<String>, missing: impl Into<String>) -> Self {
        Self::MissingBranchInput {
            branch: branch.into(),
            missing: missing.into(),
        }
    }

    /// Returns true for errors that must abort the run before any node executes.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingLabelFile { .. }
                | Self::MalformedLabelFile { .. }
                | Self::UnbuildablePath(_)
                | Self::DuplicateOutputPath { .. }
                | Self::DuplicateScan(_)
                | Self::MissingBranchInput { .. }
                | Self::InvalidOption(_)
                | Self::Graph(_)
        )
    }

    /// Diagnostic information for the error, when a code is assigned to it.
    #[must_use]
    pub fn error_info(&self) -> Option<ErrorInfo> {
        let info = match self {
            Self::MissingLabelFile { flag, expected, .. } => {
                ErrorInfo::new("CONFIG-001-MISSING_LABELS", "Label file not found")
                    .with_fix_hint(format!(
                        "Pass {flag} or create {}",
                        expected.display()
                    ))
                    .with_context_entry("flag", flag.clone())
            }
            Self::MalformedLabelFile { source_name, .. } => {
                ErrorInfo::new("CONFIG-002-MALFORMED_LABELS", "Label file could not be parsed")
                    .with_fix_hint("Label files are tab separated with \"index\" and \"name\" columns.")
                    .with_context_entry("source", source_name.clone())
            }
            Self::UnbuildablePath(err) => return Some(err.error_info()),
            Self::DuplicateOutputPath { path } => {
                ErrorInfo::new("CONFIG-004-DUPLICATE_OUTPUT", "Two outputs resolve to the same path")
                    .with_fix_hint("Use distinct model space names for the enabled branches.")
                    .with_context_entry("path", path.display().to_string())
            }
            Self::DuplicateScan(_) => {
                ErrorInfo::new("CONFIG-005-DUPLICATE_SCAN", "Scans share the same identity")
                    .with_fix_hint("Narrow the selection with the session/acquisition/reconstruction/run filters.")
            }
            Self::MissingBranchInput { branch, missing } => {
                ErrorInfo::new("CONFIG-006-MISSING_BRANCH_INPUT", "Optional branch is missing an input")
                    .with_context_entry("branch", branch.clone())
                    .with_context_entry("missing", missing.clone())
            }
            Self::Graph(err) => return err.error_info.clone(),
            Self::ResourceProfile(_) => ErrorInfo::new("RESOURCE-001-PROFILE", "Resource profile is invalid")
                .with_fix_hint("Profiles need equally long name, rss_GiB, vms_GiB, cpus and time arrays."),
            _ => return None,
        };
        Some(info)
    }
}

/// Metadata about an error for better diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "GRAPH-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Raised when an artifact descriptor cannot be rendered into a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unable to build output path for {artifact}: {reason}")]
pub struct UnbuildablePathError {
    /// The logical artifact name.
    pub artifact: String,
    /// Why the template could not be satisfied.
    pub reason: String,
}

impl UnbuildablePathError {
    /// Creates a new unbuildable path error.
    #[must_use]
    pub fn new(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Diagnostic information.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        ErrorInfo::new("CONFIG-003-UNBUILDABLE_PATH", self.reason.clone())
            .with_fix_hint("This indicates a bug in the output descriptor table.")
            .with_context_entry("artifact", self.artifact.clone())
    }
}

/// Raised when a workflow graph fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphValidationError {
    /// The error message.
    pub message: String,
    /// The nodes involved in the error.
    pub nodes: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl GraphValidationError {
    /// Creates a new graph validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            nodes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }
}

/// Raised when a cycle is detected in a workflow graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in workflow: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of nodes forming the cycle.
    pub cycle_path: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ErrorInfo::new(
            "GRAPH-004-CYCLE",
            format!("Workflow contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the connections in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for GraphValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            nodes: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}
