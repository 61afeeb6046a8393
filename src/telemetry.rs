//! Tracing setup for binaries and tests that embed the explorer.

use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Install a global subscriber: `RUST_LOG`-driven filtering, compact
/// formatted output, and span-trace capture for error reports.
///
/// Embedders that configure their own subscriber should not call this.
/// Calling it twice is harmless; the second installation is dropped.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .try_init();
}
