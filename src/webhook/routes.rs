//! HTTP endpoints: inbound webhook and health.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::pipeline::processor::{Pipeline, WebhookRequest};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct WebhookState {
    pub pipeline: Arc<Pipeline>,
}

/// Build the Axum router with the webhook and health routes.
pub fn webhook_routes(pipeline: Arc<Pipeline>, max_body_bytes: usize) -> Router {
    let state = WebhookState { pipeline };

    Router::new()
        .route("/webhook/inbound", post(inbound))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "reply-relay"
    }))
}

// ── Inbound ─────────────────────────────────────────────────────────────

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn inbound(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request = WebhookRequest {
        body: &body,
        content_type: header(&headers, CONTENT_TYPE.as_str()),
        timestamp: header(&headers, TIMESTAMP_HEADER),
        signature: header(&headers, SIGNATURE_HEADER),
    };

    match state.pipeline.handle(request).await {
        Ok(reply) => {
            info!(to = %reply.to, profile = %reply.profile, "Webhook accepted");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "accepted",
                    "profile": reply.profile,
                    "cached": reply.cached,
                })),
            )
        }
        Err(e) => {
            let status = e.status_code();
            warn!(status = status.as_u16(), error = %e, "Webhook rejected");
            (status, Json(serde_json::json!({"error": e.to_string()})))
        }
    }
}
