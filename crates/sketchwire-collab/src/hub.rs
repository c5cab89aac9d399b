//! Outbound fan-out
//!
//! Each subscribed connection owns a bounded queue. A project broadcast never
//! waits on a consumer: a full queue loses that frame for that connection
//! only. A targeted delivery (sync transfers, rejections) waits a bounded
//! time for room, since it only ever slows down the connection it is for.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::envelope::{Envelope, ProjectId};
use crate::error::{Error, Result};

/// How long a targeted delivery waits for queue space
pub const TARGETED_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Identifies one client connection
pub type ConnectionId = Uuid;

/// Where an outbound envelope goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every connection subscribed to the envelope's project
    Project,
    /// A single connection
    Connection(ConnectionId),
}

/// An envelope plus its delivery target
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Target
    pub delivery: Delivery,
    /// Message
    pub envelope: Envelope,
}

impl Outbound {
    /// Broadcast to the project
    #[must_use]
    pub fn project(envelope: Envelope) -> Self {
        Self {
            delivery: Delivery::Project,
            envelope,
        }
    }

    /// Deliver to one connection
    #[must_use]
    pub fn connection(connection_id: ConnectionId, envelope: Envelope) -> Self {
        Self {
            delivery: Delivery::Connection(connection_id),
            envelope,
        }
    }
}

/// A serialized envelope queued for one connection
#[derive(Debug, Clone)]
pub struct Frame {
    /// Topic the envelope was published on
    pub topic: Arc<str>,
    /// The envelope
    pub envelope: Arc<Envelope>,
    /// JSON text sent on the wire
    pub text: Arc<str>,
}

impl Frame {
    fn encode(envelope: Envelope) -> Result<Self> {
        let text = serde_json::to_string(&envelope)
            .map_err(|e| Error::publish(format!("encode {}: {}", envelope.kind, e)))?;
        Ok(Self {
            topic: envelope.topic().into(),
            envelope: Arc::new(envelope),
            text: text.into(),
        })
    }
}

/// Outbound delivery seam
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver an envelope; returns how many connections accepted it
    async fn publish(&self, outbound: Outbound) -> Result<usize>;
}

struct Subscriber {
    user_id: String,
    tx: mpsc::Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

/// Receiving side of a subscription
#[derive(Debug)]
pub struct Subscription {
    /// Connection this subscription belongs to
    pub connection_id: ConnectionId,
    /// Queue of frames to write to the socket
    pub rx: mpsc::Receiver<Frame>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Frames lost to a full queue so far
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait for the next frame
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Take a queued frame without waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

/// In-process fan-out hub
pub struct Hub {
    projects: DashMap<ProjectId, DashMap<ConnectionId, Subscriber>>,
    capacity: usize,
}

impl Hub {
    /// Create a hub with the given per-connection queue capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            projects: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe a connection to a project's topic
    pub fn subscribe(&self, project_id: &str, user_id: &str, connection_id: ConnectionId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        self.projects
            .entry(project_id.to_string())
            .or_default()
            .insert(
                connection_id,
                Subscriber {
                    user_id: user_id.to_string(),
                    tx,
                    dropped: dropped.clone(),
                },
            );
        debug!(project_id, user_id, connection_id = %connection_id, "Subscribed");
        Subscription {
            connection_id,
            rx,
            dropped,
        }
    }

    /// Remove a connection; returns the user it belonged to
    pub fn unsubscribe(&self, project_id: &str, connection_id: ConnectionId) -> Option<String> {
        let removed = self
            .projects
            .get(project_id)
            .and_then(|conns| conns.remove(&connection_id))
            .map(|(_, sub)| sub.user_id);
        self.projects
            .remove_if(project_id, |_, conns| conns.is_empty());
        removed
    }

    /// Open connections of one user in a project
    #[must_use]
    pub fn connections_of(&self, project_id: &str, user_id: &str) -> usize {
        self.projects
            .get(project_id)
            .map(|conns| conns.iter().filter(|s| s.user_id == user_id).count())
            .unwrap_or(0)
    }

    /// Open connections in a project
    #[must_use]
    pub fn subscriber_count(&self, project_id: &str) -> usize {
        self.projects.get(project_id).map(|c| c.len()).unwrap_or(0)
    }

    /// Whether anyone is subscribed to a project
    #[must_use]
    pub fn has_subscribers(&self, project_id: &str) -> bool {
        self.subscriber_count(project_id) > 0
    }

    fn fan_out(&self, frame: Frame) -> usize {
        let project_id = frame.envelope.project_id.as_str();
        let Some(conns) = self.projects.get(project_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for sub in conns.iter() {
            match sub.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        project_id,
                        connection_id = %sub.key(),
                        kind = %frame.envelope.kind,
                        seq = ?frame.envelope.seq,
                        "Outbound queue full, frame dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*sub.key()),
            }
        }
        for id in closed {
            conns.remove(&id);
        }
        delivered
    }

    async fn send_to(&self, connection_id: ConnectionId, frame: Frame) -> Result<usize> {
        // Clone the sender so no map guard is held across the await.
        let tx = self
            .projects
            .get(frame.envelope.project_id.as_str())
            .and_then(|conns| conns.get(&connection_id).map(|sub| sub.tx.clone()))
            .ok_or_else(|| Error::SubscriberClosed(connection_id.to_string()))?;

        match tx.send_timeout(frame, TARGETED_SEND_TIMEOUT).await {
            Ok(()) => Ok(1),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(Error::publish(format!(
                "outbound queue stalled for connection {}",
                connection_id
            ))),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                Err(Error::SubscriberClosed(connection_id.to_string()))
            }
        }
    }
}

#[async_trait]
impl Publisher for Hub {
    async fn publish(&self, outbound: Outbound) -> Result<usize> {
        let frame = Frame::encode(outbound.envelope)?;
        match outbound.delivery {
            Delivery::Project => Ok(self.fan_out(frame)),
            Delivery::Connection(id) => self.send_to(id, frame).await,
        }
    }
}
