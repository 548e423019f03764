//! Test logging.
//!
//! Umbra emits `tracing` events (binding changes at `debug`, dispatch and
//! resolution at `trace`, permissive defaults at `warn`). These helpers
//! route them to the test writer so `cargo test` captures them per test.
//!
//! The filter comes from `RUST_LOG` when set, otherwise `umbra=info`.

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "umbra=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a global test subscriber. Later calls are no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .with_target(true)
        .try_init();
}

/// Subscriber active on the current thread until the guard drops
#[must_use]
pub fn scoped_test_logging(directives: &str) -> DefaultGuard {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| filter());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(subscriber)
}

/// JSON lines to the test writer, for asserting on structured fields
#[must_use]
pub fn scoped_json_logging(directives: &str) -> DefaultGuard {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| filter());
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(subscriber)
}
