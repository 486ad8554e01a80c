//! Processing stages.
//!
//! Each function builds one self-contained graph exposing an `inputspec` and
//! an `outputspec` node. Stages only depend on their inputs and on the
//! options passed when they are built.

mod classify;
mod convert;
mod icv;
mod preprocess;
mod registration;
mod segment;
mod stats;
mod subcortical;

pub use classify::{classify_graph, CLASSIFY, CLASSIFY_INPUTS, CLASSIFY_OUTPUTS};
pub use convert::{to_mnc_graph, to_nii_gz_graph};
pub use icv::{icv_graph, ICV, ICV_INPUTS, ICV_OUTPUTS};
pub use preprocess::{preprocess_graph, PREPROCESS, PREPROCESS_INPUTS, PREPROCESS_OUTPUTS};
pub use registration::{
    registration_graph, RegistrationOptions, REGISTRATION, REGISTRATION_INPUTS, REGISTRATION_OUTPUTS,
};
pub use segment::{segment_graph, SEGMENT, SEGMENT_INPUTS, SEGMENT_OUTPUTS};
pub use stats::{stats_graph, STATS_INPUTS, STATS_OUTPUTS};
pub use subcortical::{subcortical_graph, SUBCORTICAL, SUBCORTICAL_INPUTS, SUBCORTICAL_OUTPUTS};
