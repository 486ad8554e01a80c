//! Semantic descriptors of output artifacts.

use crate::bids::EntityDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level folder of a derivative below the subject directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    /// Anatomical images and tables.
    Anat,
    /// Spatial transforms.
    Xfm,
    /// Crash reports, rooted at `<out>/logs` instead of the subject folder.
    Logs,
}

impl Datatype {
    /// Folder name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anat => "anat",
            Self::Xfm => "xfm",
            Self::Logs => "logs",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The semantic part of an output name, independent of the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactDescriptor {
    /// Final filename token before the extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    /// Extension without the leading dot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// `space-`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    /// `desc-`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// `from-`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// `to-`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// `mode-`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// `skullstripped-`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skullstripped: Option<bool>,
    /// Suffix of the artifact a label sidecar describes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presuffix: Option<String>,
}

impl ArtifactDescriptor {
    /// Creates a descriptor with the given suffix and extension.
    #[must_use]
    pub fn new(suffix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            suffix: Some(suffix.into()),
            extension: Some(extension.into()),
            ..Self::default()
        }
    }

    /// Sets `space`.
    #[must_use]
    pub fn space(mut self, space: impl Into<String>) -> Self {
        self.space = Some(space.into());
        self
    }

    /// Sets `desc`.
    #[must_use]
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Sets `from` and `to` together.
    #[must_use]
    pub fn between(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self.to = Some(to.into());
        self
    }

    /// Sets `mode`.
    #[must_use]
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Sets `skullstripped`.
    #[must_use]
    pub const fn skullstripped(mut self, skullstripped: bool) -> Self {
        self.skullstripped = Some(skullstripped);
        self
    }

    /// Descriptor of the label table describing this artifact.
    ///
    /// The extension becomes `tsv`, the suffix becomes `labels` and the
    /// original suffix is kept as `presuffix`, so sidecars of different
    /// artifacts sharing a `desc` do not collide.
    #[must_use]
    pub fn label_sidecar(&self) -> Self {
        Self {
            extension: Some("tsv".to_string()),
            presuffix: self.suffix.clone(),
            suffix: Some("labels".to_string()),
            ..self.clone()
        }
    }

    /// Folder the artifact is written to.
    #[must_use]
    pub fn datatype(&self) -> Datatype {
        if self.suffix.as_deref() == Some("xfm") {
            Datatype::Xfm
        } else {
            Datatype::Anat
        }
    }

    /// Combines this descriptor with a scan's entities.
    #[must_use]
    pub fn merge<'a>(&'a self, entities: &'a EntityDescriptor) -> MergedDescriptor<'a> {
        MergedDescriptor {
            entities,
            artifact: self,
        }
    }

    /// Key-value pairs of the descriptor, in filename order, for use as a
    /// file query (e.g. in QC configuration).
    #[must_use]
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        let mut push = |key: &'static str, value: Option<String>| {
            if let Some(v) = value {
                pairs.push((key, v));
            }
        };
        push("from", self.from.clone());
        push("to", self.to.clone());
        push("mode", self.mode.clone());
        push("space", self.space.clone());
        push("skullstripped", self.skullstripped.map(|b| b.to_string()));
        push("desc", self.desc.clone());
        push("presuffix", self.presuffix.clone());
        push("suffix", self.suffix.clone());
        push("extension", self.extension.clone());
        pairs
    }
}

/// An artifact descriptor bound to one scan's entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedDescriptor<'a> {
    /// The scan.
    pub entities: &'a EntityDescriptor,
    /// The artifact.
    pub artifact: &'a ArtifactDescriptor,
}
