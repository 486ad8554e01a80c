//! Execution engine.
//!
//! The engine runs the per-scan graphs produced by the participant driver.
//! A [`Plugin`] decides how nodes are scheduled, a [`ResourcePool`] bounds
//! what runs at once, and every failed node leaves a crash report behind.
//! Execution never raises: the [`RunReport`] says what happened to each scan.

mod crash;
mod executor;
mod hooks;
mod pool;
mod report;

pub use crash::{crash_file_name, CrashReport};
pub use executor::{ExecutionContext, Executor, ScanJob};
pub use hooks::{DryRun, HookVerdict, NodeHook, NodeInvocation, Plugin};
pub use pool::{Reservation, ResourcePool};
pub use report::{FailureRecord, RunReport, ScanOutcome};
