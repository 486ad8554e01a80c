//! Scan identity and BIDS filename parsing.

use crate::errors::UnbuildablePathError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Returns true if `value` is a valid BIDS label (non-empty, ASCII alphanumeric).
#[must_use]
pub fn is_bids_label(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric())
}

/// The key-value set identifying one scan.
///
/// Field order is also the order entities appear in filenames and the sort
/// order used when scans are enumerated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// `sub-` label.
    pub subject: String,
    /// `ses-` label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// `acq-` label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition: Option<String>,
    /// `rec-` label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconstruction: Option<String>,
    /// `run-` index, kept as written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
}

impl EntityDescriptor {
    /// Creates a descriptor for `subject` with no other entities.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Sets the session.
    #[must_use]
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Sets the acquisition.
    #[must_use]
    pub fn with_acquisition(mut self, acquisition: impl Into<String>) -> Self {
        self.acquisition = Some(acquisition.into());
        self
    }

    /// Sets the reconstruction.
    #[must_use]
    pub fn with_reconstruction(mut self, reconstruction: impl Into<String>) -> Self {
        self.reconstruction = Some(reconstruction.into());
        self
    }

    /// Sets the run.
    #[must_use]
    pub fn with_run(mut self, run: impl Into<String>) -> Self {
        self.run = Some(run.into());
        self
    }

    /// `(short key, long key, value)` for every entity that is set.
    pub fn pairs(&self) -> impl Iterator<Item = (&'static str, &'static str, &str)> + '_ {
        [
            ("sub", "subject", Some(self.subject.as_str())),
            ("ses", "session", self.session.as_deref()),
            ("acq", "acquisition", self.acquisition.as_deref()),
            ("rec", "reconstruction", self.reconstruction.as_deref()),
            ("run", "run", self.run.as_deref()),
        ]
        .into_iter()
        .filter_map(|(short, long, value)| value.map(|v| (short, long, v)))
    }

    /// Checks that every entity value is a valid BIDS label.
    pub fn validate(&self) -> Result<(), UnbuildablePathError> {
        for (short, _, value) in self.pairs() {
            if !is_bids_label(value) {
                return Err(UnbuildablePathError::new(
                    self.file_stem(),
                    format!("entity {short} has invalid value {value:?}"),
                ));
            }
        }
        Ok(())
    }

    /// Filename prefix, e.g. `sub-1_ses-a_acq-10`.
    #[must_use]
    pub fn file_stem(&self) -> String {
        self.pairs()
            .map(|(short, _, value)| format!("{short}-{value}"))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Relative directory holding this scan's derivatives, `sub-X[/ses-Y]`.
    #[must_use]
    pub fn subject_dir(&self) -> PathBuf {
        let mut dir = PathBuf::from(format!("sub-{}", self.subject));
        if let Some(session) = &self.session {
            dir.push(format!("ses-{session}"));
        }
        dir
    }

    /// Relative crash log directory, `logs/sub-X/<file stem>`.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from("logs")
            .join(format!("sub-{}", self.subject))
            .join(self.file_stem())
    }

    /// Name of the per-scan graph, e.g. `T1_subject-1_acquisition-10`.
    #[must_use]
    pub fn graph_name(&self) -> String {
        let parts: Vec<String> = self
            .pairs()
            .map(|(_, long, value)| format!("{long}-{value}"))
            .collect();
        format!("T1_{}", parts.join("_"))
    }

    /// Recovers the entities from a BIDS filename.
    #[must_use]
    pub fn from_filename(name: &str) -> Option<Self> {
        BidsFilename::parse(name)?.entities()
    }
}

impl fmt::Display for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

/// A parsed `key-value_..._suffix.extension` filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsFilename {
    /// Key-value pairs in filename order.
    pub pairs: Vec<(String, String)>,
    /// The trailing suffix, e.g. `T1w`.
    pub suffix: String,
    /// Everything after the first dot, e.g. `nii.gz`.
    pub extension: String,
}

impl BidsFilename {
    /// Parses a filename. Returns `None` if it does not follow the pattern.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let (stem, extension) = name.split_once('.')?;
        let mut parts: Vec<&str> = stem.split('_').collect();
        let suffix = parts.pop()?;
        if suffix.is_empty() || suffix.contains('-') || extension.is_empty() {
            return None;
        }
        let pairs = parts
            .into_iter()
            .map(|part| {
                let (key, value) = part.split_once('-')?;
                (!key.is_empty() && !value.is_empty() && !value.contains('-'))
                    .then(|| (key.to_string(), value.to_string()))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            pairs,
            suffix: suffix.to_string(),
            extension: extension.to_string(),
        })
    }

    /// Value of the first pair with `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Scan entities; `None` without a `sub` pair.
    #[must_use]
    pub fn entities(&self) -> Option<EntityDescriptor> {
        let owned = |key: &str| self.get(key).map(str::to_string);
        Some(EntityDescriptor {
            subject: owned("sub")?,
            session: owned("ses"),
            acquisition: owned("acq"),
            reconstruction: owned("rec"),
            run: owned("run"),
        })
    }
}
