//! HTTP service boundary.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/render` | Render one component |
//! | POST | `/render-batch` | Render many, isolating failures per item |
//! | GET | `/healthz` | Liveness plus component and cache counts |
//! | GET | `/metrics` | Plain-text gauges |
//!
//! Render failures degrade to a response carrying fallback markup
//! (`<tag></tag>`) so the page can still mount a client-only element.

use crate::error::RenderError;
use crate::pipeline::{RenderedFragment, Renderer};
use crate::props::RenderRequest;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write;
use std::sync::Arc;

/// Shared handler state.
pub type AppState = Arc<Renderer>;

pub fn router(renderer: Arc<Renderer>) -> Router {
    Router::new()
        .route("/render", post(handle_render))
        .route("/render-batch", post(handle_render_batch))
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(renderer)
}

/// Empty placeholder element for a failed render.
///
/// Only produced for syntactically valid element names, so a hostile tag
/// never turns into markup.
pub fn fallback_html(tag: &str) -> String {
    let mut chars = tag.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_'));
    if valid {
        format!("<{0}></{0}>", tag)
    } else {
        String::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    #[serde(rename_all = "camelCase")]
    Rendered {
        tag: String,
        #[serde(flatten)]
        fragment: RenderedFragment,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        tag: String,
        error: String,
        fallback_html: String,
    },
    Invalid {
        error: String,
    },
}

/// Render every item independently; one failure never affects its siblings.
pub fn render_batch(renderer: &Renderer, items: &[Value]) -> Vec<BatchItem> {
    items
        .iter()
        .map(|item| {
            let request = match RenderRequest::from_json(item) {
                Ok(request) => request,
                Err(_) => {
                    return BatchItem::Invalid {
                        error: "invalid item".to_string(),
                    }
                }
            };
            match renderer.render(&request.tag, &request.props) {
                Ok(fragment) => BatchItem::Rendered {
                    tag: request.tag,
                    fragment,
                },
                Err(err) => {
                    tracing::error!(tag = %request.tag, error = %err, "batch item failed");
                    BatchItem::Failed {
                        fallback_html: fallback_html(&request.tag),
                        tag: request.tag,
                        error: err.to_string(),
                    }
                }
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub ok: bool,
    pub component_count: usize,
    pub cache_entry_count: usize,
    #[serde(rename = "cacheTTLms")]
    pub cache_ttl_ms: u64,
    pub timestamp: String,
}

pub fn health(renderer: &Renderer) -> HealthReport {
    let stats = renderer.cache_stats();
    HealthReport {
        ok: true,
        component_count: renderer.registry().len(),
        cache_entry_count: stats.entries,
        cache_ttl_ms: stats.ttl.as_millis() as u64,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Prometheus-style text exposition.
pub fn metrics(renderer: &Renderer) -> String {
    let stats = renderer.cache_stats();
    let mut out = String::new();
    let _ = writeln!(out, "ssr_components_loaded {}", renderer.registry().len());
    let _ = writeln!(out, "ssr_cache_entries {}", stats.entries);
    let _ = writeln!(out, "ssr_cache_ttl_ms {}", stats.ttl.as_millis());
    let _ = writeln!(out, "ssr_cache_bytes {}", stats.bytes);
    let _ = writeln!(out, "ssr_cache_hits_total {}", stats.hits);
    let _ = writeln!(out, "ssr_cache_misses_total {}", stats.misses);
    out
}

fn bad_request(message: impl std::fmt::Display) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.to_string() }))).into_response()
}

fn render_failure(tag: &str, err: &RenderError) -> Response {
    tracing::error!(tag, error = %err, "render failed");
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let body = json!({
        "error": err.to_string(),
        "fallbackHtml": fallback_html(tag),
    });
    (status, Json(body)).into_response()
}

async fn handle_render(State(renderer): State<AppState>, Json(body): Json<Value>) -> Response {
    let request = match RenderRequest::from_json(&body) {
        Ok(request) => request,
        Err(err) => return bad_request(err),
    };

    let tag = request.tag.clone();
    let result =
        tokio::task::spawn_blocking(move || renderer.render(&request.tag, &request.props)).await;

    match result {
        Ok(Ok(fragment)) => Json(fragment).into_response(),
        Ok(Err(err)) => render_failure(&tag, &err),
        Err(join) => render_failure(&tag, &RenderError::failure(join)),
    }
}

async fn handle_render_batch(State(renderer): State<AppState>, Json(body): Json<Value>) -> Response {
    let items = match body.get("components") {
        Some(Value::Array(items)) => items.clone(),
        _ => return bad_request("`components` must be an array"),
    };

    match tokio::task::spawn_blocking(move || render_batch(&renderer, &items)).await {
        Ok(results) => Json(json!({ "results": results })).into_response(),
        Err(join) => {
            tracing::error!(error = %join, "batch render task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": join.to_string() })),
            )
                .into_response()
        }
    }
}

async fn handle_health(State(renderer): State<AppState>) -> Json<HealthReport> {
    Json(health(&renderer))
}

async fn handle_metrics(State(renderer): State<AppState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], metrics(&renderer))
}
