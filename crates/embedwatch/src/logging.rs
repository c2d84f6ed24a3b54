//! Logging setup for binaries embedding the tracker.
//!
//! Library code logs through the `log` facade and opens `tracing` spans per
//! observation session. `init_logging` installs a `tracing-subscriber` formatter
//! and bridges `log` records into it.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "warn,embedwatch=info";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the global subscriber. Safe to call more than once; only the first
/// call has an effect.
pub fn init_logging(format: LogFormat, default_filter: Option<&str>) {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.unwrap_or(DEFAULT_FILTER)));

    let result = match format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .finish(),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .finish(),
        ),
    };

    if let Err(e) = result {
        log::debug!("Logging already initialized: {}", e);
    }
}
