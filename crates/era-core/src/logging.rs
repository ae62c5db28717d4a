use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable colored output, for interactive CLI use.
    Human,
    /// Structured JSON output, for the long-running daemon.
    Json,
}

/// Initialize the global tracing subscriber. Call once at process startup.
/// Respects `RUST_LOG`; default filter is `era=info,warn`.
pub fn init(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("era=info,warn"));

    match format {
        LogFormat::Human => {
            let subscriber = fmt::layer().with_target(false).with_thread_ids(false).compact();
            tracing_subscriber::registry().with(env_filter).with(subscriber).init();
        }
        LogFormat::Json => {
            let subscriber = fmt::layer().json().with_target(true);
            tracing_subscriber::registry().with(env_filter).with(subscriber).init();
        }
    }
}
