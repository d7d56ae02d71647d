//! Smart allocation: the deposit-splitting policy layer.
//!
//! When a user's allocation mode is active, incoming deposits are split
//! between a "spending" balance and a "stash" balance by a per-user ratio,
//! posted as a single three-entry ledger transaction. Each split is recorded
//! as an immutable [`AllocationEvent`] and aggregated into weekly summaries.
//!
//! [`AllocationEvent`]: crate::event::AllocationEvent

/// Allocation events.
pub mod event;
/// Per-user allocation mode (ratios, pause/resume).
pub mod mode;
/// `AllocationService`.
pub mod service;
/// The split arithmetic.
pub mod split;
/// The `AllocationStore` persistence seam.
pub mod store;
/// Weekly aggregates.
pub mod summary;

pub use event::{AllocationEvent, AllocationEventType};
pub use mode::{AllocationMode, ModeError};
pub use service::{AllocatedDeposit, AllocationError, AllocationService};
pub use split::split_deposit;
pub use store::AllocationStore;
pub use summary::{week_start, WeeklyAllocationSummary};
