//! External command nodes.

use super::{Interface, NodeContext, NodeError, PortSpec};
use crate::graph::{Datum, PortValues};
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Longest standard error tail kept in a failure.
const STDERR_TAIL: usize = 4000;

/// A planned run of an external program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Invocation {
    /// Arguments after the program name.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Values of the output ports once the program succeeded. Every file
    /// listed here must exist afterwards.
    pub outputs: PortValues,
}

impl Invocation {
    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a path argument.
    #[must_use]
    pub fn path_arg(self, path: &std::path::Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Declares a file output.
    #[must_use]
    pub fn output(mut self, port: impl Into<String>, path: PathBuf) -> Self {
        self.outputs.insert(port.into(), Datum::File(path));
        self
    }
}

/// An external program with typed ports.
pub trait ToolCommand: Send + Sync + Debug {
    /// Interface type name.
    fn kind(&self) -> &str;

    /// Executable name.
    fn program(&self) -> &str;

    /// Input ports.
    fn input_ports(&self) -> Vec<PortSpec>;

    /// Output ports.
    fn output_ports(&self) -> Vec<String>;

    /// True if the tool is told its thread count.
    fn takes_threads(&self) -> bool {
        false
    }

    /// Builds the command line for the given inputs.
    fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError>;
}

/// Adapts a [`ToolCommand`] to the node [`Interface`].
#[derive(Debug)]
pub struct CommandInterface<T> {
    tool: T,
}

impl<T: ToolCommand + 'static> CommandInterface<T> {
    /// Wraps `tool`.
    #[must_use]
    pub const fn new(tool: T) -> Self {
        Self { tool }
    }

    /// Wraps `tool` as a shared interface.
    #[must_use]
    pub fn shared(tool: T) -> Arc<dyn Interface> {
        Arc::new(Self::new(tool))
    }
}

#[async_trait]
impl<T: ToolCommand> Interface for CommandInterface<T> {
    fn kind(&self) -> &str {
        self.tool.kind()
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        self.tool.input_ports()
    }

    fn output_ports(&self) -> Vec<String> {
        self.tool.output_ports()
    }

    fn takes_threads(&self) -> bool {
        self.tool.takes_threads()
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let invocation = self.tool.plan(ctx)?;
        let program = self.tool.program();
        debug!(node = %ctx.node, program, args = ?invocation.args, "Running external tool");

        let output = Command::new(program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&ctx.work_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| NodeError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr.get(start..).unwrap_or(&stderr).trim().to_string();
            return Err(NodeError::ToolFailed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: tail,
            });
        }

        for datum in invocation.outputs.values() {
            for path in datum.paths() {
                if !path.exists() {
                    return Err(NodeError::MissingOutput {
                        path: path.to_path_buf(),
                    });
                }
            }
        }
        Ok(invocation.outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Shell {
        script: &'static str,
        output: &'static str,
    }

    impl ToolCommand for Shell {
        fn kind(&self) -> &str {
            "shell"
        }

        fn program(&self) -> &str {
            "sh"
        }

        fn input_ports(&self) -> Vec<PortSpec> {
            Vec::new()
        }

        fn output_ports(&self) -> Vec<String> {
            vec!["out_file".to_string()]
        }

        fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError> {
            Ok(Invocation::default()
                .arg("-c")
                .arg(self.script)
                .env("TNT_TEST", "1")
                .output("out_file", ctx.work_path(self.output)))
        }
    }

    #[tokio::test]
    async fn test_command_success() {
        let dir = tempfile::tempdir().unwrap();
        let node = CommandInterface::new(Shell {
            script: "echo $TNT_TEST > out.txt",
            output: "out.txt",
        });
        let ctx = NodeContext::new("shell", dir.path(), PortValues::new());
        let out = node.run(&ctx).await.unwrap();
        let path = out["out_file"].as_file().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap().trim(), "1");
    }

    #[tokio::test]
    async fn test_command_failure_keeps_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let node = CommandInterface::new(Shell {
            script: "echo broken >&2; exit 3",
            output: "out.txt",
        });
        let ctx = NodeContext::new("shell", dir.path(), PortValues::new());
        match node.run(&ctx).await.unwrap_err() {
            NodeError::ToolFailed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_command_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let node = CommandInterface::new(Shell {
            script: "true",
            output: "never.txt",
        });
        let ctx = NodeContext::new("shell", dir.path(), PortValues::new());
        assert!(matches!(node.run(&ctx).await, Err(NodeError::MissingOutput { .. })));
    }
}
