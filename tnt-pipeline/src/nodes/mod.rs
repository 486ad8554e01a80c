//! Node interfaces.
//!
//! An [`Interface`] is the unit of work behind a graph node: it declares its
//! ports and, given resolved inputs and a private working directory, produces
//! its outputs. Interfaces never see other nodes or global state.

mod command;
mod image;
mod io;
mod points;
pub mod tools;

pub use command::{CommandInterface, Invocation, ToolCommand};
pub use image::{
    compute_label_stats, qform_from_sform, read_volume, CombineLabels, ForceQForm, ImageStats, LabelStatRow,
    Statistic, StatsTable,
};
pub use io::{ExportFile, Gunzip, Gzip, Rename, WriteFile};
pub use points::{ConvertPoints, Csv2Tsv, Point, PointFormat};

use crate::graph::{Datum, PortValues};
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while running a single node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A required input has no value.
    #[error("input '{port}' is not set")]
    MissingInput {
        /// The input port.
        port: String,
    },

    /// An input holds the wrong kind of value.
    #[error("input '{port}' must be {expected}")]
    InputType {
        /// The input port.
        port: String,
        /// What the interface needs.
        expected: &'static str,
    },

    /// An external program could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// The program.
        program: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An external program exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        /// The program.
        program: String,
        /// Exit status description.
        status: String,
        /// Tail of the program's standard error.
        stderr: String,
    },

    /// A declared output file does not exist after the node ran.
    #[error("expected output {} was not produced", path.display())]
    MissingOutput {
        /// The missing path.
        path: PathBuf,
    },

    /// An intermediate file could not be interpreted.
    #[error("malformed file {}: {reason}", path.display())]
    Malformed {
        /// The file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// A failure forced by an execution hook.
    #[error("{0}")]
    Injected(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Creates a malformed file error.
    #[must_use]
    pub fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Short classification used in failure records.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingInput { .. } | Self::InputType { .. } => "input",
            Self::Spawn { .. } | Self::ToolFailed { .. } => "tool",
            Self::MissingOutput { .. } | Self::Malformed { .. } => "output",
            Self::Injected(_) => "injected",
            Self::Io(_) => "io",
        }
    }
}

/// An input port declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    /// Port name.
    pub name: String,
    /// Whether the graph must provide a value.
    pub required: bool,
}

impl PortSpec {
    /// A mandatory port.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    /// An optional port.
    #[must_use]
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Resolved inputs and scratch space handed to a running node.
#[derive(Debug, Clone)]
pub struct NodeContext {
    /// Fully qualified node name.
    pub node: String,
    /// Private working directory of the node; exists when the node runs.
    pub work_dir: PathBuf,
    /// Input values by port.
    pub inputs: PortValues,
    /// Threads the node may use.
    pub threads: usize,
}

impl NodeContext {
    /// Creates a context.
    #[must_use]
    pub fn new(node: impl Into<String>, work_dir: impl Into<PathBuf>, inputs: PortValues) -> Self {
        Self {
            node: node.into(),
            work_dir: work_dir.into(),
            inputs,
            threads: 1,
        }
    }

    /// Sets the thread budget.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// The value of `port`.
    pub fn input(&self, port: &str) -> Result<&Datum, NodeError> {
        self.inputs.get(port).ok_or_else(|| NodeError::MissingInput {
            port: port.to_string(),
        })
    }

    /// The single file bound to `port`.
    pub fn file(&self, port: &str) -> Result<&Path, NodeError> {
        self.input(port)?.as_file().ok_or_else(|| NodeError::InputType {
            port: port.to_string(),
            expected: "a single file",
        })
    }

    /// The files bound to `port`.
    pub fn files(&self, port: &str) -> Result<Vec<&Path>, NodeError> {
        let files = self.input(port)?.paths();
        if files.is_empty() {
            return Err(NodeError::InputType {
                port: port.to_string(),
                expected: "one or more files",
            });
        }
        Ok(files)
    }

    /// A path inside the working directory.
    #[must_use]
    pub fn work_path(&self, file_name: &str) -> PathBuf {
        self.work_dir.join(file_name)
    }
}

/// Runs blocking file or image work off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, NodeError>
where
    F: FnOnce() -> Result<T, NodeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| NodeError::Io(std::io::Error::other(e.to_string())))?
}

/// The behavior behind a graph node.
#[async_trait]
pub trait Interface: Send + Sync + Debug {
    /// Interface type name, shown in crash reports and graph output.
    fn kind(&self) -> &str;

    /// Input ports.
    fn input_ports(&self) -> Vec<PortSpec>;

    /// Output ports.
    fn output_ports(&self) -> Vec<String>;

    /// True if the interface takes an explicit thread count, which then
    /// fixes its CPU hint.
    fn takes_threads(&self) -> bool {
        false
    }

    /// Runs the node.
    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError>;
}

/// Passes its inputs through unchanged. Used for stage `inputspec` and
/// `outputspec` nodes.
#[derive(Debug, Clone)]
pub struct IdentityInterface {
    fields: Vec<String>,
}

impl IdentityInterface {
    /// Creates an identity over `fields`.
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// The fields.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

#[async_trait]
impl Interface for IdentityInterface {
    fn kind(&self) -> &str {
        "identity"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        self.fields.iter().map(PortSpec::optional).collect()
    }

    fn output_ports(&self) -> Vec<String> {
        self.fields.clone()
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        Ok(ctx
            .inputs
            .iter()
            .filter(|(port, _)| self.fields.contains(port))
            .map(|(port, value)| (port.clone(), value.clone()))
            .collect())
    }
}

/// Collects `in1..inN` into one ordered file list on `out`.
#[derive(Debug, Clone)]
pub struct MergeInterface {
    count: usize,
}

impl MergeInterface {
    /// Creates a merge of `count` inputs.
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self { count }
    }
}

#[async_trait]
impl Interface for MergeInterface {
    fn kind(&self) -> &str {
        "merge"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        (1..=self.count).map(|i| PortSpec::required(format!("in{i}"))).collect()
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out".to_string()]
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let mut files = Vec::new();
        for i in 1..=self.count {
            files.extend(ctx.files(&format!("in{i}"))?.into_iter().map(Path::to_path_buf));
        }
        Ok(PortValues::from([("out".to_string(), Datum::Files(files))]))
    }
}
