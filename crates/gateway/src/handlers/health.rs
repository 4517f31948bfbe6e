//! Health handlers

use crate::AppState;
use axum::{extract::State, Json};
use recall_common::errors::Result;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness probe
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: recall_common::VERSION,
    })
}

/// Readiness probe: verifies the catalog is reachable
pub async fn ready(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    state.catalog.list_sources().await?;
    Ok(Json(HealthResponse {
        status: "ready",
        version: recall_common::VERSION,
    }))
}
