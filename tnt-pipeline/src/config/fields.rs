//! The input and output field sets of the main graph.
//!
//! [`field_set`] is the only place that decides which fields exist for a
//! given combination of optional branches. The graph composer, the output
//! plan and the debug-IO wiring all call it.

use crate::naming::ArtifactDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which optional branches are enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Branches {
    /// Subcortical registration and statistics.
    pub subcortical: bool,
    /// Intracranial volume masking and statistics.
    pub icv: bool,
}

impl Branches {
    /// Every combination of branch flags.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [
            Self { subcortical: false, icv: false },
            Self { subcortical: true, icv: false },
            Self { subcortical: false, icv: true },
            Self { subcortical: true, icv: true },
        ]
    }
}

/// Inputs of the main graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputField {
    /// The raw T1w scan.
    #[serde(rename = "T1")]
    T1,
    /// Template head.
    Model,
    /// Classifier training points in template space.
    Tags,
    /// Lobe atlas in template space.
    Atlas,
    /// Template brain mask.
    ModelBrainMask,
    /// Subcortical template head.
    SubcorticalModel,
    /// Subcortical atlas.
    SubcorticalAtlas,
    /// Subcortical template brain mask.
    SubcorticalModelBrainMask,
    /// Intracranial mask in template space.
    IntracranialMask,
}

impl InputField {
    /// Port name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::T1 => "T1",
            Self::Model => "model",
            Self::Tags => "tags",
            Self::Atlas => "atlas",
            Self::ModelBrainMask => "model_brain_mask",
            Self::SubcorticalModel => "subcortical_model",
            Self::SubcorticalAtlas => "subcortical_atlas",
            Self::SubcorticalModelBrainMask => "subcortical_model_brain_mask",
            Self::IntracranialMask => "intracranial_mask",
        }
    }
}

impl fmt::Display for InputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The label table describing an index-coded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// Tissue classes.
    Tissue,
    /// Lobe atlas.
    Atlas,
    /// Tissue x atlas combination.
    Combined,
    /// Subcortical atlas.
    Subcortical,
}

/// Outputs of the main graph, each written to one derivative file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum OutputField {
    #[serde(rename = "T1")]
    T1,
    Nu,
    Normalized,
    BrainMask,
    LinearTransform,
    Transform,
    InverseTransform,
    WarpedModel,
    TransformedModelBrainMask,
    Classified,
    TransformedAtlas,
    Segmented,
    Features,
    Stats,
    Brainstats,
    SubcorticalTransform,
    SubcorticalLinearTransform,
    SubcorticalInverseTransform,
    WarpedSubcorticalModel,
    NativeSubcorticalAtlas,
    SubcorticalStats,
    NativeIntracranialMask,
    IcvStats,
}

const BASE_OUTPUTS: [OutputField; 15] = [
    OutputField::T1,
    OutputField::Nu,
    OutputField::Normalized,
    OutputField::BrainMask,
    OutputField::LinearTransform,
    OutputField::Transform,
    OutputField::InverseTransform,
    OutputField::WarpedModel,
    OutputField::TransformedModelBrainMask,
    OutputField::Classified,
    OutputField::TransformedAtlas,
    OutputField::Segmented,
    OutputField::Features,
    OutputField::Stats,
    OutputField::Brainstats,
];

const SUBCORTICAL_OUTPUTS: [OutputField; 6] = [
    OutputField::SubcorticalTransform,
    OutputField::SubcorticalLinearTransform,
    OutputField::SubcorticalInverseTransform,
    OutputField::WarpedSubcorticalModel,
    OutputField::NativeSubcorticalAtlas,
    OutputField::SubcorticalStats,
];

const ICV_OUTPUTS: [OutputField; 2] = [OutputField::NativeIntracranialMask, OutputField::IcvStats];

impl OutputField {
    /// Port name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::T1 => "T1",
            Self::Nu => "nu",
            Self::Normalized => "normalized",
            Self::BrainMask => "brain_mask",
            Self::LinearTransform => "linear_transform",
            Self::Transform => "transform",
            Self::InverseTransform => "inverse_transform",
            Self::WarpedModel => "warped_model",
            Self::TransformedModelBrainMask => "transformed_model_brain_mask",
            Self::Classified => "classified",
            Self::TransformedAtlas => "transformed_atlas",
            Self::Segmented => "segmented",
            Self::Features => "features",
            Self::Stats => "stats",
            Self::Brainstats => "brainstats",
            Self::SubcorticalTransform => "subcortical_transform",
            Self::SubcorticalLinearTransform => "subcortical_linear_transform",
            Self::SubcorticalInverseTransform => "subcortical_inverse_transform",
            Self::WarpedSubcorticalModel => "warped_subcortical_model",
            Self::NativeSubcorticalAtlas => "native_subcortical_atlas",
            Self::SubcorticalStats => "subcortical_stats",
            Self::NativeIntracranialMask => "native_intracranial_mask",
            Self::IcvStats => "icv_stats",
        }
    }

    /// Output naming descriptor. `model_space` and `subcortical_space` only
    /// appear in file names.
    #[must_use]
    pub fn descriptor(self, model_space: &str, subcortical_space: &str) -> ArtifactDescriptor {
        let m = model_space;
        let s = subcortical_space;
        let image = |suffix: &str| ArtifactDescriptor::new(suffix, "nii.gz");
        let xfm = |from: &str, to: &str| ArtifactDescriptor::new("xfm", "h5").between(from, to).mode("image");
        let table = |suffix: &str| ArtifactDescriptor::new(suffix, "tsv");
        match self {
            Self::T1 => image("T1w"),
            Self::Nu => image("T1w").skullstripped(false).desc("nucor"),
            Self::Normalized => image("T1w").skullstripped(false).desc("normalized"),
            Self::BrainMask => image("mask").space("T1w").desc("brain"),
            Self::LinearTransform => xfm(m, "T1w").desc("linear"),
            Self::Transform => xfm(m, "T1w"),
            Self::InverseTransform => xfm("T1w", m),
            Self::WarpedModel => image("T1w").space("T1w").desc(m),
            Self::TransformedModelBrainMask => image("mask").space("T1w").desc(format!("{m}brain")),
            Self::Classified => image("dseg").space("T1w").desc("tissue"),
            Self::TransformedAtlas => image("dseg").space("T1w").desc(format!("{m}lobes")),
            Self::Segmented => image("dseg").space("T1w").desc("tissuelobes"),
            Self::Features => table("features").space("T1w").desc("tissue"),
            Self::Stats => table("stats").desc("tissuelobes"),
            Self::Brainstats => table("stats").desc("brain"),
            Self::SubcorticalTransform => xfm(s, "T1w").desc("subcortex"),
            Self::SubcorticalLinearTransform => xfm(s, "T1w").desc("subcortexlinear"),
            Self::SubcorticalInverseTransform => xfm("T1w", s).desc("subcortex"),
            Self::WarpedSubcorticalModel => image("T1w").space("T1w").desc(format!("subcortex{s}")),
            Self::NativeSubcorticalAtlas => image("dseg").space("T1w").desc(format!("subcortex{s}atlas")),
            Self::SubcorticalStats => table("stats").desc("subcortex"),
            Self::NativeIntracranialMask => image("mask").space("T1w").desc(format!("{m}ICV")),
            Self::IcvStats => table("stats").desc("ICV"),
        }
    }

    /// The label table written next to this output, if any.
    #[must_use]
    pub const fn label_source(self) -> Option<LabelSource> {
        match self {
            Self::Classified | Self::Features => Some(LabelSource::Tissue),
            Self::TransformedAtlas => Some(LabelSource::Atlas),
            Self::Segmented => Some(LabelSource::Combined),
            Self::NativeSubcorticalAtlas => Some(LabelSource::Subcortical),
            _ => None,
        }
    }

    /// Returns true for spatial transforms.
    #[must_use]
    pub const fn is_transform(self) -> bool {
        matches!(
            self,
            Self::LinearTransform
                | Self::Transform
                | Self::InverseTransform
                | Self::SubcorticalTransform
                | Self::SubcorticalLinearTransform
                | Self::SubcorticalInverseTransform
        )
    }

    /// Returns true for tab separated tables.
    #[must_use]
    pub const fn is_table(self) -> bool {
        matches!(
            self,
            Self::Features | Self::Stats | Self::Brainstats | Self::SubcorticalStats | Self::IcvStats
        )
    }
}

impl fmt::Display for OutputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The fields of the main graph for one combination of branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    /// Inputs in declaration order.
    pub inputs: Vec<InputField>,
    /// Outputs in declaration order.
    pub outputs: Vec<OutputField>,
}

impl FieldSet {
    /// Input port names.
    #[must_use]
    pub fn input_names(&self) -> Vec<&'static str> {
        self.inputs.iter().map(|f| f.name()).collect()
    }

    /// Output port names.
    #[must_use]
    pub fn output_names(&self) -> Vec<&'static str> {
        self.outputs.iter().map(|f| f.name()).collect()
    }
}

/// Derives the field set for the enabled branches.
#[must_use]
pub fn field_set(branches: Branches) -> FieldSet {
    let mut inputs = vec![
        InputField::T1,
        InputField::Model,
        InputField::Tags,
        InputField::Atlas,
        InputField::ModelBrainMask,
    ];
    let mut outputs = BASE_OUTPUTS.to_vec();
    if branches.subcortical {
        inputs.extend([
            InputField::SubcorticalModel,
            InputField::SubcorticalAtlas,
            InputField::SubcorticalModelBrainMask,
        ]);
        outputs.extend(SUBCORTICAL_OUTPUTS);
    }
    if branches.icv {
        inputs.push(InputField::IntracranialMask);
        outputs.extend(ICV_OUTPUTS);
    }
    FieldSet { inputs, outputs }
}
