//! Tracing subscriber setup.
//!
//! The engine only emits `tracing` spans and events; installing a
//! subscriber is left to the host. These helpers cover the common cases.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Installs a human-readable subscriber.
///
/// Uses `RUST_LOG` for filtering, falling back to `default_level`
/// (e.g. `"info"` or `"chartflow=debug"`).
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(default_level: &str) -> Result<(), TryInitError> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(default_level))
        .try_init()
}

/// Installs a subscriber writing one JSON object per line.
///
/// Span fields such as the run id are flattened into every event.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_json_tracing(default_level: &str) -> Result<(), TryInitError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(default_level))
        .try_init()
}
