//! Resource profiles.
//!
//! A profiling run samples every node and records parallel arrays of node
//! names and usage. [`ResourceProfile::aggregate`] reduces the samples to one
//! [`ResourceEstimate`] per normalized node name, and a [`ResourceTable`] of
//! those estimates overrides node scheduling hints on later runs. The scan
//! segment of a node path is dropped during normalization, so one estimate
//! serves the same node of every scan.

use crate::errors::PipelineError;
use crate::graph::ResourceHints;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Prefix of the per-scan graph segment in node paths.
const SCAN_SEGMENT_PREFIX: &str = "T1_";

/// Raw samples of a profiling run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfile {
    /// Node path of each sample.
    pub name: Vec<String>,
    /// Resident memory in GiB.
    #[serde(rename = "rss_GiB")]
    pub rss_gib: Vec<f64>,
    /// Virtual memory in GiB.
    #[serde(rename = "vms_GiB")]
    pub vms_gib: Vec<f64>,
    /// CPU usage in percent of one core.
    pub cpus: Vec<f64>,
    /// Sample timestamp.
    pub time: Vec<f64>,
}

impl ResourceProfile {
    /// Parses a profile, checking that all arrays have the same length.
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        let profile: Self = serde_json::from_str(text)
            .map_err(|e| PipelineError::ResourceProfile(format!("malformed profile: {e}")))?;
        profile.check_lengths()?;
        Ok(profile)
    }

    /// Loads a profile file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::ResourceProfile(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    fn check_lengths(&self) -> Result<(), PipelineError> {
        let n = self.name.len();
        let lengths = [
            ("rss_GiB", self.rss_gib.len()),
            ("vms_GiB", self.vms_gib.len()),
            ("cpus", self.cpus.len()),
            ("time", self.time.len()),
        ];
        if let Some((column, len)) = lengths.iter().find(|(_, len)| *len != n) {
            return Err(PipelineError::ResourceProfile(format!(
                "column {column} has {len} entries but name has {n}"
            )));
        }
        Ok(())
    }

    /// Reduces the samples to one estimate per normalized node name.
    ///
    /// CPU count is the peak CPU percentage rounded up to whole cores, at
    /// least one. Memory is the peak resident memory.
    #[must_use]
    pub fn aggregate(&self) -> ResourceTable {
        let mut peaks: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        for ((name, rss), cpus) in self.name.iter().zip(&self.rss_gib).zip(&self.cpus) {
            let entry = peaks.entry(normalize_node_name(name)).or_insert((0.0, 0.0));
            entry.0 = entry.0.max(*cpus);
            entry.1 = entry.1.max(*rss);
        }
        let entries = peaks
            .into_iter()
            .map(|(name, (cpus, mem))| (name, ResourceEstimate { ncpu: cores(cpus), mem }))
            .collect();
        ResourceTable { entries }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn cores(percent: f64) -> usize {
    let cores = (percent / 100.0).ceil();
    if cores.is_finite() && cores >= 1.0 {
        cores as usize
    } else {
        1
    }
}

/// Removes the per-scan graph segment from a dotted node path.
///
/// `participant.T1_subject-1_run-1.main.preproc.bet` becomes
/// `participant.main.preproc.bet`.
#[must_use]
pub fn normalize_node_name(name: &str) -> String {
    name.split('.')
        .filter(|segment| !segment.starts_with(SCAN_SEGMENT_PREFIX))
        .collect::<Vec<_>>()
        .join(".")
}

/// Scheduling estimate of one node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    /// CPUs.
    pub ncpu: usize,
    /// Memory in GiB.
    pub mem: f64,
}

/// Estimates by normalized node name, as written by `create-resource-file`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceTable {
    entries: BTreeMap<String, ResourceEstimate>,
}

impl ResourceTable {
    /// Loads a table written by [`ResourceTable::save`].
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::ResourceProfile(format!("{}: {e}", path.display())))?;
        let table: Self = serde_json::from_str(&text)
            .map_err(|e| PipelineError::ResourceProfile(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), nodes = table.len(), "Loaded resource table");
        Ok(table)
    }

    /// Writes the table as JSON.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Adds or replaces the estimate for `name`, normalizing it first.
    pub fn insert(&mut self, name: &str, estimate: ResourceEstimate) {
        self.entries.insert(normalize_node_name(name), estimate);
    }

    /// Estimate for a node path, normalized before lookup.
    #[must_use]
    pub fn get(&self, node_path: &str) -> Option<&ResourceEstimate> {
        self.entries.get(&normalize_node_name(node_path))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The hints of `node_path` after applying its estimate. Memory is always
    /// overridden; the CPU count only when the tool is not told its thread
    /// count explicitly.
    #[must_use]
    pub fn apply(&self, node_path: &str, hints: ResourceHints) -> ResourceHints {
        let Some(estimate) = self.get(node_path) else {
            return hints;
        };
        let n_procs = if hints.threads_pinned { hints.n_procs } else { estimate.ncpu };
        debug!(node = node_path, n_procs, mem_gb = estimate.mem, "Applied resource estimate");
        ResourceHints {
            n_procs,
            mem_gb: estimate.mem,
            threads_pinned: hints.threads_pinned,
        }
    }
}

/// Converts a profile file into a resource table file.
pub fn create_resource_file(profile: &Path, out: &Path) -> Result<ResourceTable, PipelineError> {
    let table = ResourceProfile::load(profile)?.aggregate();
    table.save(out)?;
    info!(nodes = table.len(), out = %out.display(), "Wrote resource table");
    Ok(table)
}
