//! Liveness, service status, and metrics exposition.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "health",
    responses((status = 200, description = "Service identity and environment"))
)]
pub async fn api_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Prometheus text exposition.
pub async fn metrics_text(State(state): State<AppState>) -> String {
    state.metrics.export_text()
}

pub async fn metrics_json(State(state): State<AppState>) -> Json<Value> {
    Json(state.metrics.export_json())
}
