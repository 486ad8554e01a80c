//! Values flowing along graph edges.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Port name to value map of one node.
pub type PortValues = BTreeMap<String, Datum>;

/// A value carried by an edge or bound to a node input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Datum {
    /// A single file.
    File(PathBuf),
    /// An ordered list of files.
    Files(Vec<PathBuf>),
    /// A plain parameter.
    Param(serde_json::Value),
}

impl Datum {
    /// Creates a file datum.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// The path of a single-file datum. A one-element list also qualifies.
    #[must_use]
    pub fn as_file(&self) -> Option<&Path> {
        match self {
            Self::File(p) => Some(p),
            Self::Files(ps) if ps.len() == 1 => ps.first().map(PathBuf::as_path),
            _ => None,
        }
    }

    /// All paths carried by the datum, in order.
    #[must_use]
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Self::File(p) => vec![p.as_path()],
            Self::Files(ps) => ps.iter().map(PathBuf::as_path).collect(),
            Self::Param(_) => Vec::new(),
        }
    }

    /// The parameter value, if this is a parameter.
    #[must_use]
    pub const fn as_param(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Param(v) => Some(v),
            _ => None,
        }
    }
}

impl From<PathBuf> for Datum {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for Datum {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_file() {
        assert_eq!(Datum::file("/a").as_file(), Some(Path::new("/a")));
        assert_eq!(Datum::Files(vec!["/a".into()]).as_file(), Some(Path::new("/a")));
        assert_eq!(Datum::Files(vec!["/a".into(), "/b".into()]).as_file(), None);
        assert_eq!(Datum::Param(serde_json::json!(1)).as_file(), None);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(Datum::file("/a.nii")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "file", "value": "/a.nii"}));
    }
}
