//! Shared types and utilities used across the financial core.
//!
//! Everything in this crate is deliberately free of domain logic: the ledger,
//! chain, and treasury crates build on the primitives here (amounts, ids,
//! timestamps) and on the small async toolkit (shutdown signal, named tasks,
//! notify channel, backoff).

// Enforce disallowed methods clippy lint
#![deny(clippy::disallowed_methods)]

/// Money amounts as non-negative decimals.
pub mod amount;
/// Exponential backoff iterators, with and without jitter.
pub mod backoff;
/// The currencies the ledger knows about.
pub mod currency;
/// Newtype ids for every persisted entity, plus idempotency keys.
pub mod ids;
/// The coalescing `notify` channel.
pub mod notify;
/// One-way push notification seam.
pub mod push;
/// Key-value secret lookup seam.
pub mod secrets;
/// Multi-producer multi-consumer shutdown signal.
pub mod shutdown;
/// The store error trichotomy shared by the non-ledger stores.
pub mod store;
/// Named task handles and task supervision.
pub mod task;
/// Proptest helpers shared across crates' tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
/// Millisecond unix timestamps.
pub mod time;
