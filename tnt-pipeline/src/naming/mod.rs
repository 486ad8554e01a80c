//! Output naming: artifact descriptors, path resolution and per-scan output
//! plans.
//!
//! Every output path is a pure function of an [`ArtifactDescriptor`] and the
//! scan's [`EntityDescriptor`](crate::bids::EntityDescriptor). The full set
//! of paths of a scan is checked for collisions before anything is written.

mod descriptor;
mod export;
mod plan;
mod resolver;

pub use descriptor::{ArtifactDescriptor, Datatype, MergedDescriptor};
pub use export::{export_graph, EXPORT_GRAPH};
pub use plan::{first_duplicate, OutputPlan, PlannedOutput, PlannedSidecar};
pub use resolver::{allowed_extensions, OutputResolver};
