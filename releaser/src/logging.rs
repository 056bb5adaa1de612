//! Diagnostic tracing for releaser.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Fleet reports are
//! product output and always go to stdout, unaffected by the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. When unset the filter is `warn`, or `info` with
/// `--verbose`, which logs every removal and cutover.
///
/// # Example
/// ```bash
/// RUST_LOG=releaser=debug releaser cleanup --dry-run
/// ```
pub fn init(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
