//! # TNT pipeline
//!
//! Tissue and lobe segmentation of T1-weighted scans in a BIDS dataset.
//!
//! Each scan gets its own workflow graph: preprocessing, registration to a
//! template, tissue classification, lobe segmentation and per-region
//! statistics, optionally extended by subcortical and intracranial volume
//! branches. The crate provides:
//!
//! - **Label tables**: loading, serializing and combining index to name tables
//! - **Output naming**: deterministic BIDS derivative paths with collision checks
//! - **Stages**: self-contained graphs composed into one main graph per scan
//! - **Execution**: serial, parallel and debug scheduling with crash reports
//! - **Group level**: all per-scan statistics in one table
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tnt_pipeline::prelude::*;
//!
//! let options = ParticipantOptions::from_json_file(Path::new("options.json"))?;
//! let report = run_participant(input, output, &options, RunHooks::default()).await?;
//! report.check()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod bids;
pub mod compose;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod graph;
pub mod group;
pub mod labels;
pub mod naming;
pub mod nodes;
pub mod participant;
pub mod profile;
pub mod qc;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bids::{BidsDataset, EntityDescriptor, EntityFilter, Scan, ScanFilter};
    pub use crate::compose::main_graph;
    pub use crate::config::{
        Branches, ExecutionOptions, FailureMode, ParticipantOptions, PipelineConfig, PipelineRequest, PluginKind,
    };
    pub use crate::engine::{
        ExecutionContext, Executor, HookVerdict, NodeHook, NodeInvocation, Plugin, RunReport, ScanJob, ScanOutcome,
    };
    pub use crate::errors::{ErrorInfo, GraphValidationError, PipelineError};
    pub use crate::events::{CollectingEventSink, EventKind, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::graph::{Datum, GraphBuilder, NodeSpec, PortValues, WorkflowGraph};
    pub use crate::group::run_group;
    pub use crate::labels::{LabelCombination, LabelSet};
    pub use crate::naming::{ArtifactDescriptor, OutputPlan, OutputResolver};
    pub use crate::participant::{run_participant, ParticipantPlan, RunHooks};
    pub use crate::profile::{create_resource_file, ResourceTable};
    pub use crate::qc::{write_qc_config, QcSettings};
}
