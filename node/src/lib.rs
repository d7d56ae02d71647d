//! The service binary: wires the stores, engines and loops together and
//! supervises them through shutdown.

/// Command line arguments.
pub mod cli;
/// Startup wiring and the run loop.
pub mod run;
