//! Maps artifact descriptors onto derivative paths.

use super::descriptor::{ArtifactDescriptor, MergedDescriptor};
use crate::bids::{is_bids_label, EntityDescriptor};
use crate::errors::UnbuildablePathError;
use std::path::{Path, PathBuf};

/// Allowed extensions for each known suffix.
#[must_use]
pub fn allowed_extensions(suffix: &str) -> Option<&'static [&'static str]> {
    match suffix {
        "T1w" | "mask" | "dseg" => Some(&["nii", "nii.gz"]),
        "xfm" => Some(&["h5", "txt"]),
        "features" | "stats" | "labels" => Some(&["tsv"]),
        _ => None,
    }
}

/// Builds output paths under a derivatives root.
///
/// Resolution is pure; directories are created by
/// [`OutputPlan::create_directories`](super::OutputPlan::create_directories)
/// once the whole set of paths for a scan is known to be unique.
#[derive(Debug, Clone)]
pub struct OutputResolver {
    root: PathBuf,
}

impl OutputResolver {
    /// Creates a resolver rooted at the output folder.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The output folder.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `artifact` for the scan identified by `entities`.
    ///
    /// Template:
    /// `sub-S[/ses-X]/<datatype>/sub-S[_ses-X][_acq-A][_rec-R][_run-N][_from-F][_to-T][_mode-M][_space-P][_skullstripped-B][_desc-D][_<presuffix>]_<suffix>.<extension>`
    pub fn resolve(
        &self,
        artifact: &str,
        descriptor: &ArtifactDescriptor,
        entities: &EntityDescriptor,
    ) -> Result<PathBuf, UnbuildablePathError> {
        let relative = render(artifact, descriptor.merge(entities))?;
        Ok(self.root.join(relative))
    }

    /// Crash log directory for a scan, `<root>/logs/sub-S/<file stem>`.
    pub fn crash_dir(&self, entities: &EntityDescriptor) -> Result<PathBuf, UnbuildablePathError> {
        entities.validate()?;
        Ok(self.root.join(entities.log_dir()))
    }

    /// Location of the combined group table.
    #[must_use]
    pub fn group_table(&self) -> PathBuf {
        self.root.join("group").join("group.tsv")
    }
}

fn render(artifact: &str, merged: MergedDescriptor<'_>) -> Result<PathBuf, UnbuildablePathError> {
    let fail = |reason: String| UnbuildablePathError::new(artifact, reason);
    let d = merged.artifact;
    merged.entities.validate().map_err(|e| fail(e.reason))?;

    let suffix = d.suffix.as_deref().ok_or_else(|| fail("suffix is missing".into()))?;
    let extension = d
        .extension
        .as_deref()
        .ok_or_else(|| fail("extension is missing".into()))?;
    let allowed = allowed_extensions(suffix).ok_or_else(|| fail(format!("unknown suffix {suffix:?}")))?;
    if !allowed.contains(&extension) {
        return Err(fail(format!(
            "extension {extension:?} is not valid for suffix {suffix:?}"
        )));
    }
    if d.from.is_some() != d.to.is_some() {
        return Err(fail("from and to must be given together".into()));
    }
    if d.presuffix.is_some() && suffix != "labels" {
        return Err(fail("presuffix is only valid for label files".into()));
    }

    let skullstripped = d.skullstripped.map(|b| b.to_string());
    let descriptor_pairs = [
        ("from", d.from.as_deref()),
        ("to", d.to.as_deref()),
        ("mode", d.mode.as_deref()),
        ("space", d.space.as_deref()),
        ("skullstripped", skullstripped.as_deref()),
        ("desc", d.desc.as_deref()),
    ];

    let mut tokens: Vec<String> = vec![merged.entities.file_stem()];
    for (key, value) in descriptor_pairs {
        if let Some(value) = value {
            if !is_bids_label(value) {
                return Err(fail(format!("{key} has invalid value {value:?}")));
            }
            tokens.push(format!("{key}-{value}"));
        }
    }
    if let Some(presuffix) = d.presuffix.as_deref() {
        if !is_bids_label(presuffix) {
            return Err(fail(format!("presuffix has invalid value {presuffix:?}")));
        }
        tokens.push(presuffix.to_string());
    }
    tokens.push(suffix.to_string());

    Ok(merged
        .entities
        .subject_dir()
        .join(d.datatype().as_str())
        .join(format!("{}.{extension}", tokens.join("_"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> OutputResolver {
        OutputResolver::new("/out")
    }

    #[test]
    fn test_resolve_anat() {
        let ent = EntityDescriptor::new("1").with_session("a").with_acquisition("10");
        let d = ArtifactDescriptor::new("T1w", "nii.gz").skullstripped(false).desc("nucor");
        let path = resolver().resolve("nu", &d, &ent).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/out/sub-1/ses-a/anat/sub-1_ses-a_acq-10_skullstripped-false_desc-nucor_T1w.nii.gz")
        );
    }

    #[test]
    fn test_resolve_xfm() {
        let ent = EntityDescriptor::new("2");
        let d = ArtifactDescriptor::new("xfm", "h5")
            .between("SYS808", "T1w")
            .mode("image")
            .desc("linear");
        let path = resolver().resolve("linear_transform", &d, &ent).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/out/sub-2/xfm/sub-2_from-SYS808_to-T1w_mode-image_desc-linear_xfm.h5")
        );
    }

    #[test]
    fn test_resolve_label_sidecar() {
        let ent = EntityDescriptor::new("1");
        let d = ArtifactDescriptor::new("dseg", "nii.gz").space("T1w").desc("tissue");
        let path = resolver().resolve("classified", &d.label_sidecar(), &ent).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/out/sub-1/anat/sub-1_space-T1w_desc-tissue_dseg_labels.tsv")
        );
    }

    #[test]
    fn test_round_trip_entities() {
        let ent = EntityDescriptor::new("1").with_reconstruction("11").with_run("12");
        let d = ArtifactDescriptor::new("stats", "tsv").desc("brain");
        let path = resolver().resolve("brainstats", &d, &ent).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(EntityDescriptor::from_filename(name), Some(ent));
    }

    #[test]
    fn test_unbuildable() {
        let ent = EntityDescriptor::new("1");
        let cases = [
            ArtifactDescriptor::default(),
            ArtifactDescriptor::new("T1w", "h5"),
            ArtifactDescriptor::new("unknown", "tsv"),
            ArtifactDescriptor::new("T1w", "nii.gz").desc("not_valid"),
            ArtifactDescriptor {
                from: Some("a".into()),
                ..ArtifactDescriptor::new("xfm", "h5")
            },
            ArtifactDescriptor {
                presuffix: Some("dseg".into()),
                ..ArtifactDescriptor::new("T1w", "nii.gz")
            },
        ];
        for d in cases {
            assert!(resolver().resolve("x", &d, &ent).is_err(), "{d:?}");
        }
        let bad_entities = EntityDescriptor::new("1-2");
        assert!(resolver()
            .resolve("x", &ArtifactDescriptor::new("T1w", "nii"), &bad_entities)
            .is_err());
    }

    #[test]
    fn test_crash_dir() {
        let ent = EntityDescriptor::new("1").with_acquisition("10");
        assert_eq!(
            resolver().crash_dir(&ent).unwrap(),
            PathBuf::from("/out/logs/sub-1/sub-1_acq-10")
        );
        assert_eq!(resolver().group_table(), PathBuf::from("/out/group/group.tsv"));
    }
}
