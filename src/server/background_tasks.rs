//! Background task startup functions

use sketchwire_collab::BroadcastRouter;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodically evict idle project sessions nobody is connected to
pub fn start_session_eviction(router: Arc<BroadcastRouter>, token: CancellationToken) -> JoinHandle<()> {
    let interval = router.config().eviction_interval();
    let idle = router.config().session_idle();
    info!(
        "Session eviction started (interval: {}s, idle threshold: {}s)",
        interval.as_secs(),
        idle.as_secs()
    );

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let evicted = router.evict_idle().await;
                    if evicted.is_empty() {
                        debug!(live = router.sessions().len(), "Eviction sweep: nothing idle");
                    } else {
                        info!(
                            evicted = evicted.len(),
                            live = router.sessions().len(),
                            "Evicted idle project sessions"
                        );
                    }
                }
                _ = token.cancelled() => {
                    debug!("Session eviction stopped");
                    break;
                }
            }
        }
    })
}
