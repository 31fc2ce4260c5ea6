//! Logging and metrics setup, done once at startup.

use crate::cli::{LogFormat, LogLevel};
use anyhow::{Context, Result};
use metrics::Unit;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Logfmt => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_current_span(false)).try_init(),
    }
    .context("failed to install tracing subscriber")
}

/// Installs the Prometheus recorder as the global `metrics` recorder and
/// returns the handle `/metrics` renders from.
pub fn install_metrics_recorder() -> Result<PrometheusHandle> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    describe_metrics();
    Ok(handle)
}

/// Registers descriptions for every metric the relay emits.
pub fn describe_metrics() {
    metrics::describe_counter!("http_requests_total", Unit::Count, "Total number of notification requests, labeled by target.");
    metrics::describe_counter!("http_requests_error", Unit::Count, "Total number of failed notification requests, labeled by target and reason.");
    metrics::describe_counter!("alert_count", Unit::Count, "Total number of alerts rendered into notifications, labeled by target.");
    metrics::describe_counter!("alert_drop_count", Unit::Count, "Total number of alerts dropped over the per-request limit, labeled by target.");
    metrics::describe_counter!("config_reloads_total", Unit::Count, "Total number of configuration reloads, labeled by result.");
}
