//! Tracing subscriber setup.
//!
//! Installs a `tracing` subscriber and bridges the `log` macros used
//! throughout the crate into it. Filtering follows `RUST_LOG`, with an
//! `info` default. Embedders that install their own subscriber can skip
//! this entirely.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initializes logging for standalone use. Safe to call once per
/// process; later calls are no-ops.
pub fn init(json: bool) {
    if tracing_log::LogTracer::init().is_err() {
        // A logger is already installed.
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if result.is_err() {
        log::debug!("Tracing subscriber was already set");
    }
}
