//! Tracing setup for applications embedding medsafe_core.
//!
//! The library only emits `tracing` events. Hosts that do not install their
//! own subscriber can use these helpers, which scope the chosen level to this
//! crate and keep dependencies (reqwest, hyper) at `warn`.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Accepted values for `logging.level`
pub const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Install the default subscriber at `info`
pub fn init() -> bool {
    init_with_level("info")
}

/// Install the subscriber described by the `[logging]` config section
pub fn init_from_config(config: &LoggingConfig) -> bool {
    init_with_level(&config.level)
}

/// Install a compact subscriber with this crate at `level`.
///
/// RUST_LOG, when set, replaces the whole filter. Returns false if a global
/// subscriber was already installed; the existing one is kept.
pub fn init_with_level(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(crate_directive(level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init()
        .is_ok()
}

fn crate_directive(level: &str) -> String {
    format!("warn,medsafe_core={}", level.to_lowercase())
}

/// Route events to the test harness's captured output
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new(crate_directive("debug")))
        .try_init();
}
