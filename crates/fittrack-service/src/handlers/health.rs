//! Health check handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Whether the AI endpoints have an upstream configured.
    pub openai_configured: bool,
    /// Whether wearable pull sync is configured.
    pub wearables_configured: bool,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "fittrack".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        openai_configured: state.has_openai(),
        wearables_configured: state.has_wearables(),
    })
}
