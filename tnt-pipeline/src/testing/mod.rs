//! Test support: a synthetic BIDS dataset and node hooks for the debug
//! plugin.

mod fixtures;
mod mocks;

pub use fixtures::{scan_content, SyntheticDataset, ATLAS_LABELS, SUBCORTICAL_LABELS, TISSUE_LABELS};
pub use mocks::{FailingHook, RecordingHook};
