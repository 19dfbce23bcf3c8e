//! Process-wide logging setup.
//!
//! JSON formatted `tracing` output with an environment-driven filter. Every
//! binary and test harness that wants engine logs calls [`init`] once at
//! startup; later calls are no-ops, so shared fixtures can call it freely.

use tracing_subscriber::EnvFilter;

/// Fallback directives when `RUST_LOG` is unset.
const DEFAULT_DIRECTIVES: &str = "info,wareflow_engine=debug";

/// Initialize JSON logging for the process.
///
/// The filter comes from `RUST_LOG`, falling back to [`DEFAULT_DIRECTIVES`].
/// Only the first call installs a subscriber.
pub fn init() {
    init_with_directives(DEFAULT_DIRECTIVES);
}

/// Same as [`init`] but with explicit fallback directives.
pub fn init_with_directives(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
