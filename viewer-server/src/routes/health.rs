//! `/health`, `/livez`, `/readyz`, `/metrics` — process and dependency
//! health, plus the Prometheus exposition endpoint every subsystem's
//! metrics land in.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// `GET /health` — unconditional liveness: the process is up and able to
/// answer HTTP at all.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `GET /livez` — identical to `/health`; kept as a separate route because
/// orchestrators commonly probe it by name.
pub async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

/// `GET /readyz` — the server is ready to serve traffic only if the
/// catalogue store actually answers a query; a locked or corrupt database
/// fails readiness without failing liveness.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(state.store.pool()).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
        Err(err) => {
            tracing::warn!(%err, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not ready" }))).into_response()
        }
    }
}

/// `GET /metrics` — Prometheus text exposition of every registry gathered
/// in [`viewer_core::metrics::REGISTRY`].
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        viewer_core::metrics::gather_metrics(),
    )
}
