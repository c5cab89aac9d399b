//! Server initialization
//!
//! Loads configuration, builds the collaboration router and serves the
//! WebSocket gateway until a shutdown signal arrives.

use super::background_tasks::start_session_eviction;
use super::config::AppConfig;
use super::loader::load_config;
use super::shutdown::shutdown_signal;
use crate::websocket::GatewayState;
use anyhow::{Context, Result};
use axum::{routing::get, Extension, Router};
use sketchwire_collab::{BroadcastRouter, ForwardedIdentity, IdentityResolver};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Build the HTTP application
pub fn build_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(crate::api::health::health_handler))
        .route(
            "/ws/project/:project_id",
            get(crate::websocket::project_ws_handler),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(Extension(state)),
        )
}

/// Build the gateway state from configuration
pub fn build_state(config: &AppConfig, shutdown: CancellationToken) -> Result<Arc<GatewayState>> {
    let router = BroadcastRouter::builder(config.collab.clone())
        .build()
        .context("Failed to build collaboration router")?;
    let identity: Arc<dyn IdentityResolver> = Arc::new(ForwardedIdentity);

    Ok(Arc::new(GatewayState {
        router: Arc::new(router),
        identity,
        max_message_bytes: config.server.max_message_bytes,
        shutdown,
    }))
}

/// Run the server
pub async fn run() -> Result<()> {
    let config = load_config().context("Failed to load configuration")?;
    info!(
        lock_max_ttl_ms = config.collab.lock_max_ttl_ms,
        sync_chunk_size = config.collab.sync_chunk_size,
        rate_limit = config.collab.rate_limit.enabled,
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let state = build_state(&config, shutdown.clone())?;
    let eviction = start_session_eviction(state.router.clone(), shutdown.clone());

    let app = build_app(state);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Collaboration gateway listening on ws://{}/ws/project/{{projectId}}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("HTTP server error")?;

    shutdown.cancel();
    match tokio::time::timeout(Duration::from_secs(5), eviction).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Eviction task error: {}", e),
        Err(_) => warn!("Eviction task shutdown timeout"),
    }

    info!("Sketchwire shutdown complete");
    Ok(())
}
