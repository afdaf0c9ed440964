use axum::response::{IntoResponse, Json};
use serde_json::json;

/// Liveness probe (GET /)
pub async fn root() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

/// Health check (GET /health)
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
