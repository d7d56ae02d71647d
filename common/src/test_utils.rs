//! Test helpers shared across the workspace's crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so downstream
//! crates can pull these in for their own tests without shipping proptest in
//! release builds.

/// Serde roundtrip proptest helpers.
pub mod roundtrip;
