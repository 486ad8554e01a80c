//! Label tables mapping integer indices in label images to region names.
//!
//! Label tables are stored as tab separated text with an `index` and a
//! `name` column. Sidecars written by the pipeline always use CRLF line
//! endings; parsing accepts either.

mod combine;

pub use combine::{CombinedLabel, LabelCombination};

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

/// Suffix appended to an image's base name to find its label table.
pub const LABEL_FILE_SUFFIX: &str = "_labels.tsv";

/// One entry of a label table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    /// Value of the voxels carrying this label.
    pub index: u32,
    /// Human readable region name.
    pub name: String,
}

impl Label {
    /// Creates a new label.
    #[must_use]
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.name)
    }
}

/// Why a label could not be added to a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelRejection {
    /// Another entry already uses this index.
    DuplicateIndex(u32),
    /// The name is blank, has surrounding whitespace or contains a tab or
    /// line break.
    InvalidName(String),
}

impl fmt::Display for LabelRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateIndex(index) => write!(f, "duplicate index {index}"),
            Self::InvalidName(name) => write!(f, "invalid label name {name:?}"),
        }
    }
}

/// An ordered index to name table with unique indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Label>", into = "Vec<Label>")]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    /// Creates an empty label set.
    #[must_use]
    pub const fn new() -> Self {
        Self { labels: Vec::new() }
    }

    /// Builds a set from `(index, name)` pairs, keeping their order.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, LabelRejection>
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for (index, name) in pairs {
            set.push(index, name)?;
        }
        Ok(set)
    }

    /// Appends a label.
    pub fn push(&mut self, index: u32, name: impl Into<String>) -> Result<(), LabelRejection> {
        let name = name.into();
        if name.is_empty() || name.trim() != name || name.contains(['\t', '\r', '\n']) {
            return Err(LabelRejection::InvalidName(name));
        }
        if self.get(index).is_some() {
            return Err(LabelRejection::DuplicateIndex(index));
        }
        self.labels.push(Label { index, name });
        Ok(())
    }

    /// Returns the name registered for `index`.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.index == index)
            .map(|l| l.name.as_str())
    }

    /// Iterates over labels in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.labels.iter()
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns true if the set has no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Serializes to the canonical sidecar text.
    #[must_use]
    pub fn to_tsv(&self) -> String {
        let mut out = String::from("index\tname\r\n");
        for label in &self.labels {
            let _ = write!(out, "{}\t{}\r\n", label.index, label.name);
        }
        out
    }

    /// Parses label table text. `source_name` only appears in error messages.
    pub fn parse(text: &str, source_name: &str) -> Result<Self, PipelineError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut lines = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let Some((_, header)) = lines.next() else {
            return Err(PipelineError::malformed_labels(source_name, None, "file is empty"));
        };
        let columns: Vec<&str> = header.split('\t').map(str::trim).collect();
        let column = |name: &str| {
            columns.iter().position(|c| *c == name).ok_or_else(|| {
                PipelineError::malformed_labels(
                    source_name,
                    Some(1),
                    format!("missing \"{name}\" column"),
                )
            })
        };
        let index_col = column("index")?;
        let name_col = column("name")?;

        let mut set = Self::new();
        for (lineno, line) in lines {
            let lineno = lineno + 1;
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != columns.len() {
                return Err(PipelineError::malformed_labels(
                    source_name,
                    Some(lineno),
                    format!("expected {} columns, found {}", columns.len(), fields.len()),
                ));
            }
            let index = fields[index_col].trim().parse::<u32>().map_err(|_| {
                PipelineError::malformed_labels(
                    source_name,
                    Some(lineno),
                    format!("index {:?} is not a non-negative integer", fields[index_col]),
                )
            })?;
            set.push(index, fields[name_col].trim())
                .map_err(|e| PipelineError::malformed_labels(source_name, Some(lineno), e.to_string()))?;
        }
        Ok(set)
    }

    /// Reads and parses a label file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Combines this set with `other` into the cross product.
    #[must_use]
    pub fn combine(&self, other: &Self) -> LabelCombination {
        LabelCombination::new(self, other)
    }
}

impl TryFrom<Vec<Label>> for LabelSet {
    type Error = String;

    fn try_from(labels: Vec<Label>) -> Result<Self, Self::Error> {
        Self::from_pairs(labels.into_iter().map(|l| (l.index, l.name))).map_err(|e| e.to_string())
    }
}

impl From<LabelSet> for Vec<Label> {
    fn from(set: LabelSet) -> Self {
        set.labels
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.labels.iter()
    }
}

/// Convention-derived label table path for an image.
///
/// Every extension is stripped, so `atlas.nii.gz` maps to `atlas_labels.tsv`
/// in the same directory.
#[must_use]
pub fn label_file_for(base: &Path) -> PathBuf {
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match name.char_indices().skip(1).find(|(_, c)| *c == '.') {
        Some((pos, _)) => &name[..pos],
        None => name.as_str(),
    };
    base.with_file_name(format!("{stem}{LABEL_FILE_SUFFIX}"))
}

/// Picks the label table for `base`: the explicit path when given, else the
/// convention-derived path if it exists.
pub fn resolve_label_file(
    explicit: Option<&Path>,
    base: &Path,
    flag: &str,
) -> Result<PathBuf, PipelineError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let expected = label_file_for(base);
    if expected.is_file() {
        Ok(expected)
    } else {
        Err(PipelineError::MissingLabelFile {
            base: base.to_path_buf(),
            expected,
            flag: flag.to_string(),
        })
    }
}

/// Resolves and loads the label table for `base`.
pub fn load_labels(explicit: Option<&Path>, base: &Path, flag: &str) -> Result<LabelSet, PipelineError> {
    let path = resolve_label_file(explicit, base, flag)?;
    LabelSet::load(&path)
}
