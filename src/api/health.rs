//! Health check endpoint

use axum::extract::Extension;
use axum::response::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::websocket::GatewayState;

/// Health response for load balancers
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Live project sessions
    pub sessions: usize,
}

/// `GET /health`
pub async fn health_handler(Extension(state): Extension<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.router.sessions().len(),
    })
}
