//! Crash reports of failed nodes.

use crate::graph::PortValues;
use crate::nodes::NodeError;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Everything recorded about a failed node.
#[derive(Debug)]
pub struct CrashReport<'a> {
    /// Graph name of the scan.
    pub scan: &'a str,
    /// Node path inside the scan graph.
    pub node: &'a str,
    /// Interface type name.
    pub interface: &'a str,
    /// Inputs the node was given.
    pub inputs: &'a PortValues,
    /// The failure.
    pub error: &'a NodeError,
}

/// `crash-<timestamp>-<node>-<uuid>.txt`
#[must_use]
pub fn crash_file_name(node: &str, at: DateTime<Local>) -> String {
    let node = node.replace(['/', '\\'], "_");
    format!("crash-{}-{node}-{}.txt", at.format("%Y%m%d-%H%M%S"), Uuid::new_v4())
}

impl CrashReport<'_> {
    /// Plain text form of the report.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Node: {}", self.node);
        let _ = writeln!(out, "Scan: {}", self.scan);
        let _ = writeln!(out, "Interface: {}", self.interface);
        out.push_str("Inputs:\n");
        for (port, value) in self.inputs {
            let _ = writeln!(out, "  {port} = {}", serde_json::to_string(value).unwrap_or_default());
        }
        let _ = writeln!(out, "Error ({}):", self.error.kind());
        let _ = writeln!(out, "{}", self.error);
        out
    }

    /// Writes the report below `dir`, creating it, and returns its path.
    pub fn write(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(crash_file_name(self.node, Local::now()));
        std::fs::write(&path, self.render())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Datum;

    #[test]
    fn test_crash_file_name() {
        let at = Local::now();
        let name = crash_file_name("main.preproc.bet", at);
        assert!(name.starts_with(&format!("crash-{}-main.preproc.bet-", at.format("%Y%m%d-%H%M%S"))));
        assert!(name.ends_with(".txt"));
        assert_ne!(name, crash_file_name("main.preproc.bet", at));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = PortValues::from([("in_file".to_string(), Datum::file("/data/sub-1_T1w.nii.gz"))]);
        let error = NodeError::ToolFailed {
            program: "bet".into(),
            status: "exit status: 1".into(),
            stderr: "cannot open image".into(),
        };
        let report = CrashReport {
            scan: "T1_subject-1",
            node: "main.preproc.bet",
            interface: "bet",
            inputs: &inputs,
            error: &error,
        };
        let crash_dir = dir.path().join("logs/sub-1/sub-1");
        let path = report.write(&crash_dir).unwrap();
        assert_eq!(path.parent(), Some(crash_dir.as_path()));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("Node: main.preproc.bet"));
        assert!(text.contains("sub-1_T1w.nii.gz"));
        assert!(text.contains("Error (tool):"));
        assert!(text.contains("cannot open image"));
    }
}
