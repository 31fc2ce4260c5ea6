//! Read-only status API mounted under `/api/v1`.
//!
//! Every response uses the envelope
//! `{"status": "success"|"error", "data": ..., "errorType": ..., "error": ...}`.

use super::AppState;
use crate::config::{SecretUrl, Target, TargetMessage};
use crate::models::WebhookMessage;
use crate::notifier::NotificationBuilder;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status/config", get(serve_config))
        .route("/status/templates", get(serve_templates))
        .route("/status/templates/render", post(serve_render_template))
        .route("/status/buildinfo", get(serve_build_info))
        .route("/status/runtimeinfo", get(serve_runtime_info))
        .route("/status/flags", get(serve_flags))
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum ErrorType {
    BadData,
    Unavailable,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_type: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn success<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        status: "success",
        data: Some(data),
        error_type: None,
        error: None,
    })
    .into_response()
}

fn failure(code: StatusCode, error_type: ErrorType, message: impl ToString) -> Response {
    let body = Envelope::<()> {
        status: "error",
        data: None,
        error_type: Some(error_type),
        error: Some(message.to_string()),
    };
    (code, Json(body)).into_response()
}

fn not_loaded() -> Response {
    failure(
        StatusCode::SERVICE_UNAVAILABLE,
        ErrorType::Unavailable,
        "configuration not loaded",
    )
}

#[derive(Serialize)]
struct ConfigInfo {
    yaml: String,
}

async fn serve_config(State(state): State<AppState>) -> Response {
    match state.coordinator.current() {
        Some(published) => success(ConfigInfo {
            yaml: published.config.to_redacted_yaml(),
        }),
        None => not_loaded(),
    }
}

#[derive(Serialize)]
struct TemplateInfo {
    name: String,
    title: String,
    text: String,
}

#[derive(Serialize)]
struct TemplatesInfo {
    templates: Vec<TemplateInfo>,
}

/// The effective title and text templates: the default first, then every
/// target in name order.
async fn serve_templates(State(state): State<AppState>) -> Response {
    let Some(published) = state.coordinator.current() else {
        return not_loaded();
    };
    let config = &published.config;

    let default = config.default_message();
    let mut templates = vec![TemplateInfo {
        name: "<default>".to_string(),
        title: default.title,
        text: default.text,
    }];
    for (name, target) in &config.targets {
        let message = config.message_for(target);
        templates.push(TemplateInfo {
            name: name.clone(),
            title: message.title,
            text: message.text,
        });
    }
    success(TemplatesInfo { templates })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest {
    #[serde(default)]
    title: String,
    #[serde(default)]
    text: String,
    #[serde(rename = "demoAlertJSON", default)]
    demo_alert_json: String,
}

#[derive(Serialize)]
struct RenderResponse {
    markdown: String,
}

/// Renders a title/text pair against a sample payload, as a throwaway
/// target would.
async fn serve_render_template(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(published) = state.coordinator.current() else {
        return not_loaded();
    };

    let request: RenderRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return failure(StatusCode::BAD_REQUEST, ErrorType::BadData, e),
    };
    let message: WebhookMessage = match serde_json::from_str(&request.demo_alert_json) {
        Ok(message) => message,
        Err(e) => return failure(StatusCode::BAD_REQUEST, ErrorType::BadData, e),
    };

    let url = match SecretUrl::parse("http://localhost/") {
        Ok(url) => url,
        Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, ErrorType::BadData, e),
    };
    let mut target = Target::new(url);
    target.message = Some(TargetMessage {
        message_type: None,
        title: Some(request.title),
        text: Some(request.text),
    });

    let builder = NotificationBuilder::new(&published.templates, &published.config, &target);
    match builder.build(&message) {
        Ok(rendered) => success(RenderResponse {
            markdown: rendered.text,
        }),
        Err(e) => {
            error!(err = %e, "Failed to render template preview");
            failure(StatusCode::BAD_REQUEST, ErrorType::BadData, e)
        }
    }
}

#[derive(Serialize)]
struct BuildInfo {
    version: &'static str,
    name: &'static str,
}

async fn serve_build_info() -> Response {
    success(BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        name: env!("CARGO_PKG_NAME"),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeInfo {
    start_time: String,
    #[serde(rename = "CWD")]
    cwd: String,
    config_generation: Option<u64>,
}

async fn serve_runtime_info(State(state): State<AppState>) -> Response {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|e| format!("<error retrieving current working directory: {e}>"));
    success(RuntimeInfo {
        start_time: state.started_at.to_rfc3339(),
        cwd,
        config_generation: state.coordinator.current().map(|s| s.generation),
    })
}

async fn serve_flags(State(state): State<AppState>) -> Response {
    success(&state.options.flags)
}
