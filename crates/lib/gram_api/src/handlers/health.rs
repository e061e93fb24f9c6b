//! Liveness probes.

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// `GET /health`, `/healthz`, `/livez`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
