//! Synthetic datasets.

use crate::config::PipelineRequest;
use crate::labels::label_file_for;
use std::io;
use std::path::{Path, PathBuf};

/// Tissue labels written next to the synthetic tag file.
pub const TISSUE_LABELS: &str = "index\tname\r\n1\tCSF\r\n2\tGM\r\n3\tWM\r\n";
/// Lobe labels written next to the synthetic atlas.
pub const ATLAS_LABELS: &str = "index\tname\r\n1\tfrontal\r\n2\ttemporal\r\n3\toccipital\r\n";
/// Labels written next to the synthetic subcortical atlas.
pub const SUBCORTICAL_LABELS: &str = "index\tname\r\n10\tthalamus\r\n11\tcaudate\r\n";

const ENTITY_ORDER: [&str; 4] = ["ses", "acq", "rec", "run"];

/// Bytes of the synthetic scan with file stem `stem`.
#[must_use]
pub fn scan_content(stem: &str) -> Vec<u8> {
    format!("synthetic T1w {stem}\n").into_bytes()
}

/// A BIDS dataset of placeholder T1w scans.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    root: PathBuf,
    scans: Vec<(String, Vec<(String, String)>)>,
}

impl SyntheticDataset {
    /// A dataset rooted at `root` with no scans.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scans: Vec::new(),
        }
    }

    /// Adds a scan of `subject` with extra entities given as short keys
    /// (`ses`, `acq`, `rec`, `run`).
    #[must_use]
    pub fn subject(mut self, subject: &str, entities: &[(&str, &str)]) -> Self {
        let mut entities: Vec<(String, String)> =
            entities.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        entities.sort_by_key(|(k, _)| ENTITY_ORDER.iter().position(|o| *o == k.as_str()).unwrap_or(ENTITY_ORDER.len()));
        self.scans.push((subject.to_string(), entities));
        self
    }

    /// Dataset root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File stem of each scan, in insertion order.
    #[must_use]
    pub fn stems(&self) -> Vec<String> {
        self.scans
            .iter()
            .map(|(subject, entities)| {
                std::iter::once(format!("sub-{subject}"))
                    .chain(entities.iter().map(|(k, v)| format!("{k}-{v}")))
                    .collect::<Vec<_>>()
                    .join("_")
            })
            .collect()
    }

    /// Writes `dataset_description.json` and every scan as
    /// `sub-X[/ses-Y]/anat/<stem>_T1w.nii.gz`. Returns the scan paths.
    pub fn write(&self) -> io::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(
            self.root.join("dataset_description.json"),
            r#"{"Name": "synthetic", "BIDSVersion": "1.4.0"}"#,
        )?;
        let mut paths = Vec::new();
        for ((subject, entities), stem) in self.scans.iter().zip(self.stems()) {
            let mut dir = self.root.join(format!("sub-{subject}"));
            if let Some((_, session)) = entities.iter().find(|(k, _)| k == "ses") {
                dir.push(format!("ses-{session}"));
            }
            dir.push("anat");
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(format!("{stem}_T1w.nii.gz"));
            std::fs::write(&path, scan_content(&stem))?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Points the default templates at `dir` and writes their label tables.
    /// The template images themselves are not created.
    pub fn templates(&self, dir: &Path) -> io::Result<PipelineRequest> {
        std::fs::create_dir_all(dir)?;
        let request = PipelineRequest::default().with_template_dir(dir);
        std::fs::write(label_file_for(&request.tags), TISSUE_LABELS)?;
        std::fs::write(label_file_for(&request.atlas), ATLAS_LABELS)?;
        if let Some(atlas) = &request.subcortical_atlas {
            std::fs::write(label_file_for(atlas), SUBCORTICAL_LABELS)?;
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bids::{BidsDataset, ScanFilter};

    #[test]
    fn test_written_dataset_is_discoverable() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = SyntheticDataset::new(dir.path())
            .subject("1", &[("run", "2"), ("ses", "a")])
            .subject("2", &[]);
        assert_eq!(dataset.stems(), vec!["sub-1_ses-a_run-2", "sub-2"]);
        let paths = dataset.write().unwrap();
        assert!(paths[0].ends_with("sub-1/ses-a/anat/sub-1_ses-a_run-2_T1w.nii.gz"));

        let scans = BidsDataset::open(dir.path(), true).unwrap().find_t1w_scans(&ScanFilter::default()).unwrap();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].entities.session.as_deref(), Some("a"));
        assert_eq!(std::fs::read(&scans[1].path).unwrap(), scan_content("sub-2"));
    }
}
