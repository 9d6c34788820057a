//! Optional log output for binaries and local debugging.
//!
//! The crate itself only emits `tracing` events; installing a subscriber is
//! left to the embedding application unless it opts into this helper.

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Does nothing if a global subscriber is already set.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
