//! Logging bootstrap.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! host process's choice. `init` is a convenience for services that want
//! the usual formatted output.

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `default_filter`, unless
/// `RUST_LOG` is set, in which case it wins.
///
/// Returns `false` if a global subscriber was already installed.
///
/// ```
/// interlink::telemetry::init("info,interlink::dead_letter=error");
/// assert!(!interlink::telemetry::init("debug"));
/// ```
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let format = tracing_subscriber::fmt::format()
        .with_target(true)
        .with_file(false);
    tracing_subscriber::fmt()
        .event_format(format)
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

/// Subscriber for tests: writes through the test harness's captured output.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
