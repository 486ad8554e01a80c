//! Pipeline configuration.
//!
//! [`PipelineRequest`] mirrors the command line and the JSON config file:
//! flags, template paths and optional label file paths. It is validated
//! into a [`PipelineConfig`], whose optional branches carry their inputs so
//! an enabled branch without its inputs cannot be represented.

use super::fields::{field_set, Branches, FieldSet, LabelSource, OutputField};
use crate::bids::is_bids_label;
use crate::errors::PipelineError;
use crate::labels::{load_labels, LabelCombination, LabelSet};
use crate::naming::ArtifactDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Parameters of the preprocessing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessParams {
    /// Fractional intensity threshold of brain extraction.
    #[serde(default = "default_bet_frac")]
    pub bet_frac: f64,
    /// Vertical gradient of the brain extraction threshold.
    #[serde(default)]
    pub bet_vertical_gradient: f64,
    /// Target intensity range of normalization.
    #[serde(default = "default_inormalize_const2")]
    pub inormalize_const2: [f64; 2],
    /// Histogram percentile clip of normalization.
    #[serde(default = "default_inormalize_range")]
    pub inormalize_range: f64,
    /// Largest shear angle tolerated when forcing a qform.
    #[serde(default = "default_max_shear_angle")]
    pub max_shear_angle: f64,
}

const fn default_bet_frac() -> f64 {
    0.5
}

const fn default_inormalize_const2() -> [f64; 2] {
    [0.0, 5000.0]
}

const fn default_inormalize_range() -> f64 {
    1.0
}

const fn default_max_shear_angle() -> f64 {
    1e-6
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            bet_frac: default_bet_frac(),
            bet_vertical_gradient: 0.0,
            inormalize_const2: default_inormalize_const2(),
            inormalize_range: default_inormalize_range(),
            max_shear_angle: default_max_shear_angle(),
        }
    }
}

impl PreprocessParams {
    /// Sets the brain extraction parameters.
    #[must_use]
    pub const fn with_bet(mut self, frac: f64, vertical_gradient: f64) -> Self {
        self.bet_frac = frac;
        self.bet_vertical_gradient = vertical_gradient;
        self
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.bet_frac) {
            return Err(PipelineError::InvalidOption(format!(
                "bet_frac must be between 0 and 1, got {}",
                self.bet_frac
            )));
        }
        if !(-1.0..=1.0).contains(&self.bet_vertical_gradient) {
            return Err(PipelineError::InvalidOption(format!(
                "bet_vertical_gradient must be between -1 and 1, got {}",
                self.bet_vertical_gradient
            )));
        }
        Ok(())
    }
}

/// Template images of the main registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSet {
    /// Template head.
    pub model: PathBuf,
    /// Name of the template space, used only in file names.
    pub model_space: String,
    /// Template brain mask.
    pub model_brain_mask: PathBuf,
    /// Classifier training points (`x, y, z, index`) in template space.
    pub tags: PathBuf,
    /// Lobe atlas in template space.
    pub atlas: PathBuf,
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self {
            model: PathBuf::from("/template/SYS_808.nii.gz"),
            model_space: "SYS808".to_string(),
            model_brain_mask: PathBuf::from("/template/SYS808_brainmask.nii.gz"),
            tags: PathBuf::from("/template/ntags_1000_prob_90_nobg_sys808.tsv"),
            atlas: PathBuf::from("/template/SYS808_atlas_labels_nomiddle.nii.gz"),
        }
    }
}

/// Inputs of the subcortical branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcorticalBranch {
    /// Subcortical template head.
    pub model: PathBuf,
    /// Name of the subcortical template space.
    pub model_space: String,
    /// Subcortical template brain mask.
    pub model_brain_mask: PathBuf,
    /// Subcortical atlas.
    pub atlas: PathBuf,
    /// Labels of the subcortical atlas.
    pub labels: LabelSet,
}

/// Inputs of the intracranial volume branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcvBranch {
    /// Intracranial mask in template space.
    pub mask: PathBuf,
}

/// Tissue and atlas label tables plus their combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineLabels {
    /// Tissue classes of the classifier training points.
    pub tissue: LabelSet,
    /// Lobes of the atlas.
    pub atlas: LabelSet,
    /// Tissue x atlas table used by the segmentation.
    pub combination: LabelCombination,
}

impl PipelineLabels {
    /// Builds the label suite, combining tissue (outer) with atlas (inner).
    #[must_use]
    pub fn new(tissue: LabelSet, atlas: LabelSet) -> Self {
        let combination = tissue.combine(&atlas);
        Self {
            tissue,
            atlas,
            combination,
        }
    }

    /// The combined label table.
    #[must_use]
    pub fn combined(&self) -> LabelSet {
        self.combination.labels()
    }
}

/// Validated configuration of the main graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Label tables.
    pub labels: PipelineLabels,
    /// Preprocessing parameters.
    pub preprocess: PreprocessParams,
    /// Main templates.
    pub templates: TemplateSet,
    /// Subcortical branch, when enabled.
    pub subcortical: Option<SubcorticalBranch>,
    /// Intracranial volume branch, when enabled.
    pub icv: Option<IcvBranch>,
    /// Run registrations with a single iteration per level.
    pub debug: bool,
    /// Threads given to multi-threaded tools.
    pub num_threads: usize,
}

impl PipelineConfig {
    /// Creates a configuration with both optional branches disabled.
    #[must_use]
    pub fn new(labels: PipelineLabels, templates: TemplateSet) -> Self {
        Self {
            labels,
            preprocess: PreprocessParams::default(),
            templates,
            subcortical: None,
            icv: None,
            debug: false,
            num_threads: 1,
        }
    }

    /// Enables the subcortical branch.
    #[must_use]
    pub fn with_subcortical(mut self, branch: SubcorticalBranch) -> Self {
        self.subcortical = Some(branch);
        self
    }

    /// Enables the intracranial volume branch.
    #[must_use]
    pub fn with_icv(mut self, branch: IcvBranch) -> Self {
        self.icv = Some(branch);
        self
    }

    /// Sets preprocessing parameters.
    #[must_use]
    pub fn with_preprocess(mut self, preprocess: PreprocessParams) -> Self {
        self.preprocess = preprocess;
        self
    }

    /// Sets debug mode.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the thread count of multi-threaded tools.
    #[must_use]
    pub const fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Validates a loose request, loading label tables.
    pub fn from_request(request: &PipelineRequest) -> Result<Self, PipelineError> {
        request.preprocess.validate()?;
        if request.num_threads == 0 {
            return Err(PipelineError::InvalidOption("num_threads must be at least 1".into()));
        }
        check_space_name("model_space", &request.model_space)?;

        let tissue = load_labels(request.tag_labels.as_deref(), &request.tags, "--tag-labels")?;
        let atlas = load_labels(request.atlas_labels.as_deref(), &request.atlas, "--atlas-labels")?;
        let templates = TemplateSet {
            model: request.model.clone(),
            model_space: request.model_space.clone(),
            model_brain_mask: request.model_brain_mask.clone(),
            tags: request.tags.clone(),
            atlas: request.atlas.clone(),
        };

        let mut config = Self::new(PipelineLabels::new(tissue, atlas), templates)
            .with_preprocess(request.preprocess.clone())
            .with_debug(request.debug)
            .with_num_threads(request.num_threads);

        if request.subcortical {
            let required = |value: Option<&Path>, flag: &str| {
                value
                    .map(Path::to_path_buf)
                    .ok_or_else(|| PipelineError::missing_branch_input("--subcortical", flag))
            };
            let model = required(request.subcortical_model.as_deref(), "--subcortical-model")?;
            let atlas = required(request.subcortical_atlas.as_deref(), "--subcortical-atlas")?;
            let model_brain_mask = required(
                request.subcortical_model_brain_mask.as_deref(),
                "--subcortical-model-brain-mask",
            )?;
            let model_space = request
                .subcortical_model_space
                .clone()
                .ok_or_else(|| PipelineError::missing_branch_input("--subcortical", "--subcortical-model-space"))?;
            check_space_name("subcortical_model_space", &model_space)?;
            let labels = load_labels(request.subcortical_labels.as_deref(), &atlas, "--subcortical-labels")?;
            config = config.with_subcortical(SubcorticalBranch {
                model,
                model_space,
                model_brain_mask,
                atlas,
                labels,
            });
        }

        if request.intracranial_volume {
            let mask = request
                .intracranial_mask
                .clone()
                .ok_or_else(|| PipelineError::missing_branch_input("--intracranial-volume", "--intracranial-mask"))?;
            config = config.with_icv(IcvBranch { mask });
        }
        Ok(config)
    }

    /// Which optional branches are enabled.
    #[must_use]
    pub const fn branches(&self) -> Branches {
        Branches {
            subcortical: self.subcortical.is_some(),
            icv: self.icv.is_some(),
        }
    }

    /// The field set of the main graph for this configuration.
    #[must_use]
    pub fn field_set(&self) -> FieldSet {
        field_set(self.branches())
    }

    /// Name of the subcortical space, empty when the branch is disabled.
    #[must_use]
    pub fn subcortical_space(&self) -> &str {
        self.subcortical.as_ref().map_or("", |s| s.model_space.as_str())
    }

    /// Naming descriptor of every output field, in field order.
    #[must_use]
    pub fn output_descriptors(&self) -> Vec<(OutputField, ArtifactDescriptor)> {
        self.field_set()
            .outputs
            .into_iter()
            .map(|f| (f, f.descriptor(&self.templates.model_space, self.subcortical_space())))
            .collect()
    }

    /// Label table for `source`, if its branch is enabled.
    #[must_use]
    pub fn label_set(&self, source: LabelSource) -> Option<LabelSet> {
        match source {
            LabelSource::Tissue => Some(self.labels.tissue.clone()),
            LabelSource::Atlas => Some(self.labels.atlas.clone()),
            LabelSource::Combined => Some(self.labels.combined()),
            LabelSource::Subcortical => self.subcortical.as_ref().map(|s| s.labels.clone()),
        }
    }
}

fn check_space_name(option: &str, value: &str) -> Result<(), PipelineError> {
    if is_bids_label(value) {
        Ok(())
    } else {
        Err(PipelineError::InvalidOption(format!(
            "{option} must be alphanumeric, got {value:?}"
        )))
    }
}

/// Unvalidated pipeline options as given on the command line or in a JSON
/// config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineRequest {
    /// Template head.
    pub model: PathBuf,
    /// Template space name.
    pub model_space: String,
    /// Lobe atlas.
    pub atlas: PathBuf,
    /// Atlas labels; `<atlas>_labels.tsv` when unset.
    pub atlas_labels: Option<PathBuf>,
    /// Classifier training points.
    pub tags: PathBuf,
    /// Tissue labels; `<tags>_labels.tsv` when unset.
    pub tag_labels: Option<PathBuf>,
    /// Template brain mask.
    pub model_brain_mask: PathBuf,
    /// Preprocessing parameters.
    pub preprocess: PreprocessParams,
    /// Enable the subcortical branch.
    pub subcortical: bool,
    /// Subcortical template head.
    pub subcortical_model: Option<PathBuf>,
    /// Subcortical space name.
    pub subcortical_model_space: Option<String>,
    /// Subcortical atlas.
    pub subcortical_atlas: Option<PathBuf>,
    /// Subcortical template brain mask.
    pub subcortical_model_brain_mask: Option<PathBuf>,
    /// Subcortical labels; `<subcortical atlas>_labels.tsv` when unset.
    pub subcortical_labels: Option<PathBuf>,
    /// Enable the intracranial volume branch.
    pub intracranial_volume: bool,
    /// Intracranial mask in template space.
    pub intracranial_mask: Option<PathBuf>,
    /// Single-iteration registrations.
    pub debug: bool,
    /// Threads of multi-threaded tools.
    pub num_threads: usize,
}

impl Default for PipelineRequest {
    fn default() -> Self {
        let templates = TemplateSet::default();
        Self {
            model: templates.model,
            model_space: templates.model_space,
            atlas: templates.atlas,
            atlas_labels: None,
            tags: templates.tags,
            tag_labels: None,
            model_brain_mask: templates.model_brain_mask,
            preprocess: PreprocessParams::default(),
            subcortical: false,
            subcortical_model: Some(PathBuf::from("/template/colin27_t1_tal_lin.nii.gz")),
            subcortical_model_space: Some("colin".to_string()),
            subcortical_atlas: Some(PathBuf::from("/template/mask_oncolinnl_7_rs.nii.gz")),
            subcortical_model_brain_mask: Some(PathBuf::from("/template/colin27_t1_tal_lin_mask.nii.gz")),
            subcortical_labels: None,
            intracranial_volume: false,
            intracranial_mask: Some(PathBuf::from("/template/SYS808_icv.nii.gz")),
            debug: false,
            num_threads: 1,
        }
    }
}

impl PipelineRequest {
    /// Points every template input at files below `dir` with the default names.
    #[must_use]
    pub fn with_template_dir(mut self, dir: &Path) -> Self {
        let rebase = |p: &Path| dir.join(p.file_name().unwrap_or(p.as_os_str()));
        self.model = rebase(&self.model);
        self.atlas = rebase(&self.atlas);
        self.tags = rebase(&self.tags);
        self.model_brain_mask = rebase(&self.model_brain_mask);
        self.subcortical_model = self.subcortical_model.as_deref().map(rebase);
        self.subcortical_atlas = self.subcortical_atlas.as_deref().map(rebase);
        self.subcortical_model_brain_mask = self.subcortical_model_brain_mask.as_deref().map(rebase);
        self.intracranial_mask = self.intracranial_mask.as_deref().map(rebase);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, text: &str| std::fs::write(dir.path().join(name), text).unwrap();
        write("ntags_1000_prob_90_nobg_sys808_labels.tsv", "index\tname\r\n1\tGM\r\n2\tWM\r\n");
        write("SYS808_atlas_labels_nomiddle_labels.tsv", "index\tname\r\n1\tfrontal\r\n");
        dir
    }

    #[test]
    fn test_defaults() {
        let params = PreprocessParams::default();
        assert!((params.bet_frac - 0.5).abs() < f64::EPSILON);
        let parsed: PreprocessParams = serde_json::from_str("{\"bet_frac\": 0.3}").unwrap();
        assert!((parsed.bet_frac - 0.3).abs() < f64::EPSILON);
        assert_eq!(parsed.inormalize_const2, [0.0, 5000.0]);
    }

    #[test]
    fn test_from_request_base() {
        let dir = template_dir();
        let request = PipelineRequest::default().with_template_dir(dir.path());
        let config = PipelineConfig::from_request(&request).unwrap();
        assert_eq!(config.branches(), Branches::default());
        assert_eq!(config.labels.combined().len(), 2);
        assert_eq!(config.output_descriptors().len(), 15);
    }

    #[test]
    fn test_subcortical_requires_labels() {
        let dir = template_dir();
        let request = PipelineRequest {
            subcortical: true,
            ..PipelineRequest::default().with_template_dir(dir.path())
        };
        let err = PipelineConfig::from_request(&request).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("--subcortical-labels"));
    }

    #[test]
    fn test_subcortical_requires_atlas() {
        let dir = template_dir();
        let request = PipelineRequest {
            subcortical: true,
            subcortical_atlas: None,
            ..PipelineRequest::default().with_template_dir(dir.path())
        };
        let err = PipelineConfig::from_request(&request).unwrap_err();
        assert!(matches!(err, PipelineError::MissingBranchInput { .. }));
    }

    #[test]
    fn test_icv_requires_mask() {
        let dir = template_dir();
        let request = PipelineRequest {
            intracranial_volume: true,
            intracranial_mask: None,
            ..PipelineRequest::default().with_template_dir(dir.path())
        };
        let err = PipelineConfig::from_request(&request).unwrap_err();
        assert!(matches!(err, PipelineError::MissingBranchInput { .. }));

        let request = PipelineRequest {
            intracranial_volume: true,
            ..PipelineRequest::default().with_template_dir(dir.path())
        };
        let config = PipelineConfig::from_request(&request).unwrap();
        assert!(config.branches().icv);
    }

    #[test]
    fn test_missing_tissue_labels() {
        let dir = tempfile::tempdir().unwrap();
        let request = PipelineRequest::default().with_template_dir(dir.path());
        let err = PipelineConfig::from_request(&request).unwrap_err();
        assert!(matches!(err, PipelineError::MissingLabelFile { .. }));
    }

    #[test]
    fn test_invalid_space_name() {
        let dir = template_dir();
        let request = PipelineRequest {
            model_space: "SYS_808".into(),
            ..PipelineRequest::default().with_template_dir(dir.path())
        };
        assert!(matches!(
            PipelineConfig::from_request(&request),
            Err(PipelineError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_request_from_json() {
        let request: PipelineRequest =
            serde_json::from_str(r#"{"subcortical": true, "num_threads": 4}"#).unwrap();
        assert!(request.subcortical);
        assert_eq!(request.num_threads, 4);
        assert_eq!(request.model_space, "SYS808");
    }
}
