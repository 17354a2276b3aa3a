//! Process-wide diagnostics: `tracing` subscriber plus the `log` bridge.

use log::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// `RUST_LOG` wins over `fallback`; an unparseable value falls back too.
pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Installs the global subscriber. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init(format: LogFormat, fallback: &str) {
    let registry = Registry::default().with(env_filter(fallback));
    let installed = match format {
        LogFormat::Plain => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(false)))
        }
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true).with_span_list(false)),
        ),
    };
    if installed.is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
        return;
    }

    // `log` records from library code become tracing events.
    if tracing_log::LogTracer::init().is_err() {
        tracing::debug!("log bridge already installed");
    }
}
