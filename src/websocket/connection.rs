use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use sketchwire_collab::{BroadcastRouter, Connection, RouteOutcome, Subscription};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::parse_client_frame;
use super::GatewayState;

/// Max time without receiving a message before considering the connection dead.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 60;
/// How often to send server-side pings.
pub const PING_INTERVAL_SECS: u64 = 30;

/// Serve one project socket until the client leaves, goes silent or the
/// server shuts down.
pub async fn handle_project_socket(
    socket: WebSocket,
    state: Arc<GatewayState>,
    project_id: String,
    user_id: String,
) {
    let router = state.router.clone();
    let (connection, subscription) = router.connect(&project_id, &user_id);
    let (ws_tx, ws_rx) = socket.split();

    // Reader and writer stop together.
    let closing = state.shutdown.child_token();
    let writer = tokio::spawn(write_loop(
        ws_tx,
        subscription,
        connection.clone(),
        closing.clone(),
    ));

    read_loop(ws_rx, &router, &connection, &closing).await;
    closing.cancel();
    if let Err(e) = writer.await {
        warn!(connection_id = %connection.connection_id, error = %e, "Writer task failed");
    }

    router.disconnect(&connection).await;
}

async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    router: &BroadcastRouter,
    connection: &Connection,
    closing: &CancellationToken,
) {
    let heartbeat_timeout = Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);
    let mut last_recv = Instant::now();

    loop {
        let deadline = last_recv + heartbeat_timeout;
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = tokio::time::sleep_until(deadline) => {
                info!(connection_id = %connection.connection_id, "Heartbeat timeout, closing");
                return;
            }
            _ = closing.cancelled() => return,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                last_recv = Instant::now();
                route_frame(router, connection, &text).await;
            }
            Some(Ok(Message::Binary(_))) => {
                last_recv = Instant::now();
                warn!(connection_id = %connection.connection_id, "Binary frame ignored");
            }
            // axum answers pings itself
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                last_recv = Instant::now();
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(e)) => {
                warn!(connection_id = %connection.connection_id, error = %e, "Project WS error");
                return;
            }
        }
    }
}

async fn route_frame(router: &BroadcastRouter, connection: &Connection, text: &str) {
    let frame = match parse_client_frame(&connection.project_id, text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(
                project_id = %connection.project_id,
                user_id = %connection.user_id,
                error = %e,
                "Client frame dropped"
            );
            return;
        }
    };

    match router.route(connection, frame.channel, frame.message).await {
        RouteOutcome::Processed { seq, published } => {
            debug!(seq, published, "Frame routed");
        }
        RouteOutcome::RateLimited(scope) => {
            debug!(?scope, "Frame rate limited");
        }
        RouteOutcome::Dropped { code } => {
            debug!(code, "Frame dropped");
        }
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut subscription: Subscription,
    connection: Connection,
    closing: CancellationToken,
) {
    let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    ping_interval.tick().await;

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(frame.text.to_string())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = closing.cancelled() => break,
        }
    }

    let dropped = subscription.dropped();
    if dropped > 0 {
        warn!(
            connection_id = %connection.connection_id,
            user_id = %connection.user_id,
            dropped,
            "Slow consumer lost broadcast frames"
        );
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    // Unblock the reader if the socket died on the write side.
    closing.cancel();
}
