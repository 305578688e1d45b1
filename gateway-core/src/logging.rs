//! Global `tracing` subscriber initialisation.
//!
//! A single `fmt` layer driven by `RUST_LOG`, falling back to a sane
//! default. Call once, before any `tracing` macro fires.

use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Initialise the global subscriber. Safe to call more than once in tests —
/// subsequent calls are ignored if a subscriber is already set.
pub fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gateway=debug"));

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .try_init(),
    };
    if let Err(err) = result {
        tracing::debug!(%err, "tracing subscriber already initialised");
    }
}
