//! Logging setup for hosts embedding the addon subsystem.
//!
//! Thin wrapper over `tracing-subscriber`: `RUST_LOG` wins when set,
//! otherwise the supplied filter string applies. Initialisation is guarded
//! so repeated calls (host plus tests) are harmless.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialises logging at `info` level.
pub fn init() {
    init_with_filter("info");
}

/// Initialises logging with a filter string such as
/// `"moneta_addon_host=debug,moneta_addon_dev=trace"`.
///
/// Repeated calls are no-ops.
pub fn init_with_filter(filter: &str) {
    if LOGGING_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();
}

/// Whether logging was initialised through this module.
pub fn is_initialized() -> bool {
    LOGGING_INITIALIZED.load(Ordering::SeqCst)
}
