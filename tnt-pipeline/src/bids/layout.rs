//! Input dataset access: T1w scan enumeration and filtering.

use super::entities::{BidsFilename, EntityDescriptor};
use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions accepted for input scans.
pub const T1W_EXTENSIONS: [&str; 2] = ["nii", "nii.gz"];

/// Selection rule for one optional entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum EntityFilter {
    /// Any value, or no value.
    #[default]
    Any,
    /// Only scans without this entity.
    Absent,
    /// Only scans with exactly this value.
    Equals(String),
}

impl EntityFilter {
    /// Maps the `--filter-x [VALUE]` convention: a flag without a value
    /// selects scans lacking the entity.
    #[must_use]
    pub fn from_flag(flag: Option<Option<String>>) -> Self {
        match flag {
            None => Self::Any,
            Some(None) => Self::Absent,
            Some(Some(value)) => Self::Equals(value),
        }
    }

    /// Returns true if a scan with entity `value` passes.
    #[must_use]
    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            Self::Any => true,
            Self::Absent => value.is_none(),
            Self::Equals(expected) => value == Some(expected.as_str()),
        }
    }
}

/// Which scans to process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanFilter {
    /// Subjects to include (with or without the `sub-` prefix); all when `None`.
    pub participant_labels: Option<Vec<String>>,
    /// Session filter.
    pub session: EntityFilter,
    /// Acquisition filter.
    pub acquisition: EntityFilter,
    /// Reconstruction filter.
    pub reconstruction: EntityFilter,
    /// Run filter.
    pub run: EntityFilter,
}

impl ScanFilter {
    /// Restricts the filter to the given subjects.
    #[must_use]
    pub fn with_participants<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.participant_labels = Some(
            labels
                .into_iter()
                .map(|l| {
                    let l: String = l.into();
                    l.strip_prefix("sub-").map(str::to_string).unwrap_or(l)
                })
                .collect(),
        );
        self
    }

    /// Returns true if the scan with these entities is selected.
    #[must_use]
    pub fn matches(&self, entities: &EntityDescriptor) -> bool {
        let subject_ok = self.participant_labels.as_ref().map_or(true, |labels| {
            labels
                .iter()
                .any(|l| l.strip_prefix("sub-").unwrap_or(l) == entities.subject)
        });
        subject_ok
            && self.session.matches(entities.session.as_deref())
            && self.acquisition.matches(entities.acquisition.as_deref())
            && self.reconstruction.matches(entities.reconstruction.as_deref())
            && self.run.matches(entities.run.as_deref())
    }
}

/// One input T1w scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scan {
    /// Absolute or dataset-relative path of the image.
    pub path: PathBuf,
    /// Entities parsed from the filename.
    pub entities: EntityDescriptor,
}

/// A BIDS dataset on disk.
#[derive(Debug, Clone)]
pub struct BidsDataset {
    root: PathBuf,
}

impl BidsDataset {
    /// Opens a dataset. With `validate`, the root must contain
    /// `dataset_description.json`.
    pub fn open(root: impl Into<PathBuf>, validate: bool) -> Result<Self, PipelineError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(PipelineError::InvalidOption(format!(
                "input dataset {} is not a directory",
                root.display()
            )));
        }
        if validate && !root.join("dataset_description.json").is_file() {
            return Err(PipelineError::InvalidOption(format!(
                "{} is not a valid BIDS dataset: dataset_description.json is missing (use --skip-validation to bypass)",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Dataset root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Subject labels present in the dataset, sorted.
    pub fn subjects(&self) -> Result<Vec<String>, PipelineError> {
        let mut subjects: Vec<String> = prefixed_dirs(&self.root, "sub-")?
            .into_iter()
            .filter_map(|dir| {
                dir.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix("sub-"))
                    .map(str::to_string)
            })
            .collect();
        subjects.sort();
        Ok(subjects)
    }

    /// Enumerates the T1w scans selected by `filter`, sorted by entities.
    ///
    /// Fails with [`PipelineError::DuplicateScan`] if two scans share their
    /// entities (e.g. both `.nii` and `.nii.gz` exist) or their path.
    pub fn find_t1w_scans(&self, filter: &ScanFilter) -> Result<Vec<Scan>, PipelineError> {
        let mut scans = Vec::new();
        for subject_dir in prefixed_dirs(&self.root, "sub-")? {
            let mut anat_dirs = vec![subject_dir.join("anat")];
            anat_dirs.extend(
                prefixed_dirs(&subject_dir, "ses-")?
                    .into_iter()
                    .map(|d| d.join("anat")),
            );
            for anat in anat_dirs.into_iter().filter(|d| d.is_dir()) {
                for entry in std::fs::read_dir(&anat)? {
                    let path = entry?.path();
                    if let Some(scan) = t1w_scan(&path) {
                        if filter.matches(&scan.entities) {
                            scans.push(scan);
                        } else {
                            debug!(path = %path.display(), "Scan excluded by filter");
                        }
                    }
                }
            }
        }
        scans.sort_by(|a, b| a.entities.cmp(&b.entities).then_with(|| a.path.cmp(&b.path)));
        ensure_unique_scans(&scans)?;
        info!(count = scans.len(), root = %self.root.display(), "Found T1w scans");
        Ok(scans)
    }
}

fn t1w_scan(path: &Path) -> Option<Scan> {
    if !path.is_file() {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    let parsed = BidsFilename::parse(name)?;
    if parsed.suffix != "T1w" || !T1W_EXTENSIONS.contains(&parsed.extension.as_str()) {
        return None;
    }
    Some(Scan {
        path: path.to_path_buf(),
        entities: parsed.entities()?,
    })
}

fn prefixed_dirs(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix));
        if matches && path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Checks that no two scans share entities or a source path.
pub fn ensure_unique_scans(scans: &[Scan]) -> Result<(), PipelineError> {
    let mut entities = HashSet::new();
    let mut paths = HashSet::new();
    for scan in scans {
        if !entities.insert(&scan.entities) {
            return Err(PipelineError::DuplicateScan(format!(
                "duplicate entities found: {}",
                scan.entities
            )));
        }
        if !paths.insert(&scan.path) {
            return Err(PipelineError::DuplicateScan(format!(
                "duplicate filenames found: {}",
                scan.path.display()
            )));
        }
    }
    Ok(())
}
