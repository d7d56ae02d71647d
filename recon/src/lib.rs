//! Reconciliation: cross-subsystem invariant checks.
//!
//! A reconciliation run proves (or disproves) the global invariants that
//! tie the ledger, the on-chain records, and the treasury together, and
//! reports exceptions for anything an operator needs to look at. A run
//! never mutates balances; it only observes and records.

/// Check and exception records.
pub mod report;
/// `ReconService` and the eight checks.
pub mod service;
/// The reconciliation persistence + query seam.
pub mod store;

pub use report::{
    CheckRecord, CheckType, ReconException, ReconReport, ReportStatus,
    Severity,
};
pub use service::{BufferProbe, ReconConfig, ReconService};
pub use store::{EntrySums, ReconStore};
