//! Project WebSocket gateway.
//!
//! Flow:
//! 1. Client opens `/ws/project/{projectId}`, identity comes from the
//!    `x-user-id` header or the `userId` query parameter
//! 2. The identity resolver accepts or refuses the upgrade
//! 3. Client frames are routed through the collaboration router
//! 4. Project broadcasts and targeted replies stream back as envelopes

mod connection;
pub mod protocol;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use serde::Deserialize;
use sketchwire_collab::{BroadcastRouter, ConnectRequest, IdentityResolver};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Header an upstream proxy uses to assert the authenticated user
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared state behind every project socket
pub struct GatewayState {
    pub router: Arc<BroadcastRouter>,
    pub identity: Arc<dyn IdentityResolver>,
    pub max_message_bytes: usize,
    pub shutdown: CancellationToken,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// WebSocket upgrade handler for `/ws/project/:project_id`.
pub async fn project_ws_handler(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    Extension(state): Extension<Arc<GatewayState>>,
) -> Response {
    if project_id.trim().is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let request = ConnectRequest {
        project_id: project_id.clone(),
        forwarded_user: headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        query_user: query.user_id,
    };

    let Some(user_id) = state.identity.resolve(&request).await else {
        warn!(project_id = %project_id, "Connection refused: no identity");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| connection::handle_project_socket(socket, state, project_id, user_id))
}
