//! `tracing`/`tracing-subscriber` initialization.
//!
//! Modules are logged under their own target (`homenetd::pa`,
//! `homenetd::routing`, `homenetd::ipc`, …) so operators can filter
//! independently, e.g. `RUST_LOG=homenetd::pa=debug,homenetd::ipc=warn`.

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `default_filter` is used when
/// `RUST_LOG` is unset; pass the value from [`crate::config::Config::log_filter`].
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
