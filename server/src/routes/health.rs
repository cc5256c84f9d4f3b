//! Root and health check endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub uptime_seconds: u64,
    pub version: &'static str,
}

/// GET / - Service banner
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Leaf Disease Classification API",
        status: "running",
    })
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.model_loaded(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
