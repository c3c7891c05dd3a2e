use axum::{routing::get, Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Human-readable service name.
    pub service: &'static str,
    /// Server time, RFC 3339.
    pub timestamp: String,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
}

/// GET /health -- liveness probe. Touches no sessions and launches nothing.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        service: "SmartPlanMark API",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
