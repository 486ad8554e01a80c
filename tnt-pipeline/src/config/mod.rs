//! Configuration: field sets, pipeline options and run options.

mod fields;
mod options;
mod run;

pub use fields::{field_set, Branches, FieldSet, InputField, LabelSource, OutputField};
pub use options::{
    IcvBranch, PipelineConfig, PipelineLabels, PipelineRequest, PreprocessParams, SubcorticalBranch, TemplateSet,
};
pub use run::{ExecutionOptions, FailureMode, ParticipantOptions, PluginKind};
