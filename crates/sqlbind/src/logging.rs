//! Logging setup for binaries and tests that use the binding layer.
//!
//! The library itself only emits `tracing` events; nothing is printed unless
//! the embedding application installs a subscriber, for example with [`init`].

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Initialize tracing with the `warn` default filter.
///
/// The filter can be overridden through `RUST_LOG`, e.g.
/// `RUST_LOG=sqlbind=trace` to see every native call.
pub fn init() {
    init_with_filter("warn");
}

/// Initialize tracing with a custom default filter.
///
/// Only the first call in a process has an effect; a subscriber installed
/// elsewhere is left in place.
pub fn init_with_filter(default_filter: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init();
        if installed.is_ok() {
            tracing::debug!("sqlbind logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init_with_filter("trace");
        init();
    }
}
