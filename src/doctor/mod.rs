//! Diagnostics: process-wide logging setup and the sink driver validation
//! messages are routed into.

use std::sync::OnceLock;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable read by [`init_logging`] for the filter directive.
pub const LOG_ENV: &str = "VKRT_LOG";

static LOGGING: OnceLock<()> = OnceLock::new();

/// Installs the global `tracing` subscriber.
///
/// Call once from the application entry point, before constructing any
/// [`Manager`](crate::Manager). Later calls are no-ops, as is a call made when
/// another subscriber is already installed.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Sink for validation-layer output.
pub fn validation_message(severity: Severity, source: &str, id: &str, message: &str) {
    match severity {
        Severity::Error => error!(target: "vkrt::validation", source, id, "{message}"),
        Severity::Warning => warn!(target: "vkrt::validation", source, id, "{message}"),
        Severity::Info => info!(target: "vkrt::validation", source, id, "{message}"),
        Severity::Debug => debug!(target: "vkrt::validation", source, id, "{message}"),
    }
}
