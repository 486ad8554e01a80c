//! BIDS dataset layout: scan identity, filename parsing and scan discovery.

mod entities;
mod layout;

pub use entities::{is_bids_label, BidsFilename, EntityDescriptor};
pub use layout::{ensure_unique_scans, BidsDataset, EntityFilter, Scan, ScanFilter, T1W_EXTENSIONS};
