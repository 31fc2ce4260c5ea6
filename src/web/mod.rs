//! The HTTP surface.
//!
//! Routes:
//! - `POST /dingtalk/{name}/send`: relay one alert group to target `name`
//! - `GET /-/healthy`, `GET /-/ready`: liveness and readiness
//! - `POST|PUT /-/reload`: reload the configuration (lifecycle API)
//! - `GET /metrics`: Prometheus exposition
//! - `/api/v1/...`: status API, see [`api`]
//!
//! Handlers take one snapshot of the published state per request and work
//! against it; a reload finishing mid-request does not affect that request.

pub mod api;

use crate::coordinator::Coordinator;
use crate::models::WebhookMessage;
use crate::notifier::{Dispatch, NotificationBuilder};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// Settings for the HTTP surface that do not come from the configuration
/// file.
#[derive(Debug, Clone, Default)]
pub struct WebOptions {
    /// Serve `/-/reload`.
    pub enable_lifecycle: bool,
    /// Alerts kept per request; 0 keeps all.
    pub max_alert_count: usize,
    /// Command-line flags as reported by `/api/v1/status/flags`.
    pub flags: BTreeMap<String, String>,
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub dispatcher: Arc<dyn Dispatch>,
    pub options: Arc<WebOptions>,
    pub prom_handle: Option<PrometheusHandle>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, dispatcher: Arc<dyn Dispatch>, options: WebOptions) -> Self {
        Self {
            coordinator,
            dispatcher,
            options: Arc::new(options),
            prom_handle: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prom_handle = Some(handle);
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/dingtalk/{name}/send", post(send_notification))
        .route("/-/healthy", get(healthy).head(healthy))
        .route("/-/ready", get(ready).head(ready))
        .route("/-/reload", post(reload).put(reload))
        .route("/metrics", get(render_metrics))
        .nest("/api/v1", api::router())
        .with_state(state)
}

/// Serves the router on an already bound listener until shutdown is
/// signalled, then drains in-flight requests.
pub struct WebServer {
    listener: TcpListener,
    state: AppState,
    shutdown_rx: watch::Receiver<bool>,
}

impl WebServer {
    pub fn new(listener: TcpListener, state: AppState, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            listener,
            state,
            shutdown_rx,
        }
    }

    /// Returns a future that runs the server until a shutdown signal is received.
    pub fn run(self) -> impl Future<Output = ()> {
        let app = router(self.state);
        let mut shutdown_rx = self.shutdown_rx;
        let listener = self.listener;

        async move {
            if let Ok(addr) = listener.local_addr() {
                info!(address = %addr, "Listening on address");
            }
            let shutdown = async move {
                // Either a shutdown value or a dropped sender ends serving.
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
                error!(err = %e, "Web server error");
            }
            info!("Web server finished.");
        }
    }
}

/// Metric label for requests naming a target that is not configured.
pub const UNKNOWN_TARGET: &str = "<unknown>";

#[instrument(skip(state, body), fields(target_name = %name))]
async fn send_notification(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let Some(published) = state.coordinator.current() else {
        metrics::counter!("http_requests_total", "target" => UNKNOWN_TARGET).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response();
    };
    let Some(target) = published.targets.resolve(&name) else {
        // Unresolved names never become label values.
        metrics::counter!("http_requests_total", "target" => UNKNOWN_TARGET).increment(1);
        warn!("Target not found");
        request_error(UNKNOWN_TARGET, "not_found");
        return (StatusCode::NOT_FOUND, "404 page not found").into_response();
    };
    metrics::counter!("http_requests_total", "target" => name.clone()).increment(1);

    let mut message: WebhookMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            error!(err = %e, "Cannot decode webhook JSON request");
            request_error(&name, "decode");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    let max = state.options.max_alert_count;
    if max > 0 && message.alerts.len() > max {
        let dropped = message.alerts.len() - max;
        message.alerts.truncate(max);
        warn!(dropped, max, "Too many alerts, dropping the rest");
        metrics::counter!("alert_drop_count", "target" => name.clone()).increment(dropped as u64);
    }
    metrics::counter!("alert_count", "target" => name.clone()).increment(message.alerts.len() as u64);

    let builder = NotificationBuilder::new(&published.templates, &published.config, &target);
    let notification = match builder.build(&message) {
        Ok(rendered) => rendered.to_wire(),
        Err(e) => {
            error!(err = %e, "Failed to build notification");
            request_error(&name, "build");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    if let Err(e) = state
        .dispatcher
        .dispatch(&target, &notification, published.config.timeout)
        .await
    {
        let reason = if e.is_remote_rejection() { "rejected" } else { "dispatch" };
        error!(err = %e, "Failed to send notification");
        request_error(&name, reason);
        return (StatusCode::BAD_REQUEST, "Unable to talk to DingTalk").into_response();
    }

    (StatusCode::OK, "OK").into_response()
}

fn request_error(target: &str, reason: &'static str) {
    metrics::counter!("http_requests_error", "target" => target.to_string(), "reason" => reason).increment(1);
}

async fn healthy() -> &'static str {
    "OK.\n"
}

async fn ready(State(state): State<AppState>) -> Response {
    if state.coordinator.is_loaded() {
        (StatusCode::OK, "OK.\n").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

async fn reload(State(state): State<AppState>) -> Response {
    if !state.options.enable_lifecycle {
        return (StatusCode::FORBIDDEN, "Lifecycle API is not enabled.").into_response();
    }
    match state.coordinator.reload().await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to reload config: {e}"),
        )
            .into_response(),
    }
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.prom_handle {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
