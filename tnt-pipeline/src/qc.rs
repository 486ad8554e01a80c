//! Configuration of the QC pages.
//!
//! The pages themselves are rendered by an external tool. This module only
//! writes the JSON it consumes: how pages are keyed and named, how each
//! output is found (from the same descriptors the output plan uses) and
//! which reportlets appear on a page.

use crate::config::{field_set, Branches, OutputField, PipelineRequest};
use crate::errors::PipelineError;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::info;

/// Location of the QC configuration below the output folder.
pub const QC_CONFIG: &str = "qc/qc_config.json";

/// What the QC configuration depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QcSettings {
    /// File name of the template head, matched against the models folder.
    pub model_name: String,
    /// Template space name.
    pub model_space: String,
    /// Subcortical space name, when that branch ran.
    pub subcortical_space: Option<String>,
    /// Whether the intracranial volume branch ran.
    pub icv: bool,
}

impl QcSettings {
    /// Settings of a participant run made with `request`.
    #[must_use]
    pub fn from_request(request: &PipelineRequest) -> Self {
        Self {
            model_name: request
                .model
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            model_space: request.model_space.clone(),
            subcortical_space: request
                .subcortical
                .then(|| request.subcortical_model_space.clone().unwrap_or_default()),
            icv: request.intracranial_volume,
        }
    }

    const fn branches(&self) -> Branches {
        Branches {
            subcortical: self.subcortical_space.is_some(),
            icv: self.icv,
        }
    }
}

fn compare(name: &str, image: &str) -> Value {
    json!({"type": "compare", "name1": "T1 weighted input", "image1": "T1w", "name2": name, "image2": image})
}

fn contour(name: &str, labels: &str) -> Value {
    json!({"type": "contour", "name": name, "image": "T1w", "labelimage": labels})
}

fn file_filters(settings: &QcSettings) -> Map<String, Value> {
    let subcortical_space = settings.subcortical_space.as_deref().unwrap_or_default();
    let mut files = Map::new();
    files.insert(
        "model".into(),
        json!({"pattern": "models", "global": true, "filter": {"modelname": settings.model_name}}),
    );
    files.insert(
        "T1w".into(),
        json!({"pattern": "bids", "filter": {"suffix": "T1w", "desc": null, "skullstripped": null, "map": null}}),
    );
    let features = OutputField::Features.descriptor(&settings.model_space, subcortical_space);
    files.insert(
        "features_label".into(),
        json!({"pattern": "bids", "filter": {
            "extension": "tsv",
            "presuffix": features.suffix,
            "suffix": "labels",
        }}),
    );
    files.insert(
        "crashfiles".into(),
        json!({"pattern": "bids", "filter": {"crash": "crash"}, "allow_multiple": true}),
    );
    for field in field_set(settings.branches()).outputs {
        let filter: Map<String, Value> = field
            .descriptor(&settings.model_space, subcortical_space)
            .query()
            .into_iter()
            .map(|(key, value)| (key.to_string(), Value::String(value)))
            .collect();
        files.insert(field.name().into(), json!({"pattern": "bids", "filter": filter}));
    }
    files
}

/// The QC configuration for `settings`.
#[must_use]
pub fn qc_config(settings: &QcSettings) -> Value {
    let mut reportlets = vec![
        compare("non-uniformity corrected and normalized", OutputField::Normalized.name()),
        compare("Non-uniformity corrected", OutputField::Nu.name()),
        compare("Warped model", OutputField::WarpedModel.name()),
        contour("T1w with transformed model brain mask", OutputField::TransformedModelBrainMask.name()),
        json!({
            "type": "distributions",
            "name": "Tissue distributions for classification",
            "distsfile": OutputField::Features.name(),
            "labelfile": "features_label",
        }),
        contour("Tissue segmentation", OutputField::Classified.name()),
        contour("Lobes", OutputField::TransformedAtlas.name()),
    ];
    let mut notes = vec!["Poor BET", "Poor registration", "Poor classification"];
    if settings.subcortical_space.is_some() {
        reportlets.push(compare("Transformed subcortical model", OutputField::WarpedSubcorticalModel.name()));
        reportlets.push(contour("Subcortical", OutputField::NativeSubcorticalAtlas.name()));
        notes.push("Poor subcortical registration");
    }
    if settings.icv {
        reportlets.push(contour("ICV mask", OutputField::NativeIntracranialMask.name()));
        notes.push("Poor ICV mask registration");
    }
    reportlets.push(json!({"type": "crash", "name": "Errors", "crashfiles": "crashfiles"}));
    reportlets.push(json!({
        "type": "rating",
        "name": "Rating",
        "radio": {
            "name": "Overall",
            "options": [
                {"name": "Reject", "value": 1},
                {"name": "Poor", "value": 2},
                {"name": "Fair", "value": 3},
                {"name": "Good", "value": 4},
                {"name": "Excellent", "value": 5},
            ],
        },
        "checkbox": {"name": "Notes", "fields": notes},
        "text": {"name": "Other"},
    }));

    json!({
        "page_keys": ["subject", "session", "acquisition", "reconstruction", "run"],
        "page_filename_template":
            "sub-{subject}[_ses-{session}][_acq-{acquisition}][_rec-{reconstruction}][_run-{run}]_QC.html",
        "index_filename": "index.html",
        "patterns": {
            "bids": ["bids", "derivatives", {
                "name": "pndni_bids",
                "entities": [
                    {"name": "skullstripped", "pattern": "[_/\\\\]+skullstripped-([a-zA-Z0-9]+)"},
                    {"name": "map", "pattern": "[_/\\\\]+map-([a-zA-Z0-9]+)"},
                    {"name": "presuffix", "pattern": "_([a-zA-Z0-9]*?)_[a-zA-Z0-9]*?\\.[^/\\\\]+$"},
                    {"name": "crash", "pattern": "/(crash)"},
                ],
            }],
            "models": "(?P<modelname>.*)",
        },
        "files": file_filters(settings),
        "reportlets": reportlets,
    })
}

/// Writes the QC configuration to `<output>/qc/qc_config.json`.
pub fn write_qc_config(output: &Path, settings: &QcSettings) -> Result<PathBuf, PipelineError> {
    let dest = output.join(QC_CONFIG);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&dest, serde_json::to_string_pretty(&qc_config(settings))?)?;
    info!(dest = %dest.display(), "Wrote QC configuration");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(subcortical: bool, icv: bool) -> QcSettings {
        QcSettings {
            model_name: "SYS_808.nii.gz".into(),
            model_space: "SYS808".into(),
            subcortical_space: subcortical.then(|| "colin".to_string()),
            icv,
        }
    }

    #[test]
    fn test_files_follow_field_set() {
        for branches in Branches::all() {
            let settings = settings(branches.subcortical, branches.icv);
            let config = qc_config(&settings);
            let files = config["files"].as_object().unwrap();
            for field in field_set(branches).outputs {
                assert!(files.contains_key(field.name()), "{branches:?} {field}");
            }
            assert_eq!(files.len(), field_set(branches).outputs.len() + 4);
        }
    }

    #[test]
    fn test_transform_filter() {
        let config = qc_config(&settings(false, false));
        let filter = &config["files"]["transform"]["filter"];
        assert_eq!(filter["from"], "SYS808");
        assert_eq!(filter["to"], "T1w");
        assert_eq!(filter["suffix"], "xfm");
        assert_eq!(config["files"]["features_label"]["filter"]["presuffix"], "features");
        assert!(config["files"]["T1w"]["filter"]["desc"].is_null());
    }

    #[test]
    fn test_branch_reportlets() {
        let count = |s: &QcSettings| qc_config(s)["reportlets"].as_array().unwrap().len();
        assert_eq!(count(&settings(false, false)), 9);
        assert_eq!(count(&settings(true, false)), 11);
        assert_eq!(count(&settings(true, true)), 12);
        let config = qc_config(&settings(false, true));
        let notes = &config["reportlets"][9]["checkbox"]["fields"];
        assert_eq!(notes.as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_from_request_and_write() {
        let request = PipelineRequest {
            subcortical: true,
            ..PipelineRequest::default()
        };
        let settings = QcSettings::from_request(&request);
        assert_eq!(settings.model_name, "SYS_808.nii.gz");
        assert_eq!(settings.subcortical_space.as_deref(), Some("colin"));
        assert!(!settings.icv);

        let dir = tempfile::tempdir().unwrap();
        let dest = write_qc_config(dir.path(), &settings).unwrap();
        let written: Value = serde_json::from_str(&std::fs::read_to_string(dest).unwrap()).unwrap();
        assert_eq!(written, qc_config(&settings));
    }
}
