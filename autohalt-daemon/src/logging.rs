//! Log output setup.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset. Handle-level detail is logged at
/// `debug`, so it is on by default.
pub const DEFAULT_FILTER: &str = "debug";

/// Install the global subscriber: human-readable lines on stderr, filtered
/// by `RUST_LOG` or [`DEFAULT_FILTER`].
///
/// Does nothing if a subscriber is already installed.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("log subscriber already installed");
    }
}
