//! Log configuration for the financial core.
//!
//! One line of structured stdout logging per event, filtered through
//! `RUST_LOG` when set and through [`DEFAULT_DIRECTIVES`] otherwise. The
//! defaults keep our own crates at `info` while quieting the chatty HTTP
//! and database dependencies, which otherwise drown out settlement-cycle
//! and worker logs at startup.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// The filter applied when no `RUST_LOG` is set: our crates at `info`,
/// noisy dependencies at `warn`.
pub const DEFAULT_DIRECTIVES: &str =
    "info,hyper=warn,reqwest=warn,sqlx=warn,h2=warn,rustls=warn";

/// Installs the global logger for a service binary.
///
/// Panics if something already installed one; call this exactly once, at
/// the top of `main`.
pub fn init() {
    builder()
        .try_init()
        .expect("A global logger was already installed");
}

/// Installs the global logger for tests, if `RUST_LOG` asks for one.
///
/// Tests race to install the logger and most runs don't want logs at all,
/// so this is a no-op without `RUST_LOG` and never panics on double
/// installation. Output goes through the test writer so it interleaves
/// with the harness's captured output.
pub fn init_for_testing() {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    let _ = builder().with_test_writer().try_init();
}

fn builder() -> tracing_subscriber::fmt::SubscriberBuilder<
    tracing_subscriber::fmt::format::DefaultFields,
    tracing_subscriber::fmt::format::Format,
    EnvFilter,
> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        // Color only when a human is actually watching.
        .with_ansi(std::io::stdout().is_terminal())
}
