//! Health check handlers

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "lnkflow",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /health/live
pub async fn liveness() -> Json<HealthResponse> {
    health().await
}
