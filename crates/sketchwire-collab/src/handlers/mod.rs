//! Per-type message handlers
//!
//! The router resolves a handler from the message type, gives it a context
//! bound to the project session, and publishes whatever it returns. Handlers
//! receive envelopes that already carry `seq` and `timestamp`.

mod lock;
mod mutation;
mod presence;
mod stroke;
mod sync;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::clock::Clock;
use crate::document::DocumentStore;
use crate::envelope::{Envelope, MessageType};
use crate::error::{Error, Result};
use crate::hub::{ConnectionId, Outbound};
use crate::session::ProjectSession;
use crate::sync::SyncCoordinator;

pub use lock::{release_all_for, LockReleaseHandler, LockRequestHandler};
pub use mutation::{ElementUpdateHandler, MutationHandler};
pub use presence::{JoinHandler, LeaveHandler, PassthroughHandler};
pub use stroke::{StrokeAppendHandler, StrokeEndHandler};
pub use sync::SyncRequestHandler;

/// Everything a handler may touch while processing one message
pub struct HandlerContext<'a> {
    /// Session of the message's project
    pub session: &'a ProjectSession,
    /// Persistence collaborator
    pub documents: &'a dyn DocumentStore,
    /// Server clock
    pub clock: &'a dyn Clock,
    /// Sync transfer builder
    pub sync: &'a SyncCoordinator,
    /// Connection the message arrived on
    pub origin: ConnectionId,
}

impl HandlerContext<'_> {
    /// A server-issued project broadcast with its own sequence number
    pub async fn announce(&self, kind: MessageType, user_id: &str, payload: Value) -> Result<Outbound> {
        let seq = self.session.allocator().next_sequence().await?;
        Ok(Outbound::project(
            Envelope::server(kind, self.session.id(), user_id, payload)
                .with_seq(seq)
                .with_timestamp(self.clock.now_ms()),
        ))
    }

    /// A response addressed to the originating connection
    #[must_use]
    pub fn reply(&self, kind: MessageType, user_id: &str, payload: Value, seq: Option<u64>) -> Outbound {
        let mut envelope = Envelope::server(kind, self.session.id(), user_id, payload)
            .with_timestamp(self.clock.now_ms());
        envelope.seq = seq;
        Outbound::connection(self.origin, envelope)
    }

    /// Assign the next version and hand the mutation to the document store.
    ///
    /// Versions are assigned while holding the commit gate so a concurrent
    /// sync sees either the whole commit or none of it. A document store
    /// failure is logged; the version stays assigned and the broadcast still
    /// goes out.
    pub async fn commit(&self, envelope: Envelope) -> Result<Envelope> {
        let _commit = self.session.begin_commit().await;
        let version = self.session.allocator().bump_version().await?;
        let envelope = envelope.with_version(version);
        if let Err(e) = self.documents.apply(&envelope).await {
            warn!(
                project_id = %envelope.project_id,
                kind = %envelope.kind,
                version,
                error = %e,
                "Document store rejected mutation"
            );
        }
        Ok(envelope)
    }
}

/// Serialize an outbound payload
pub(crate) fn encode<T: Serialize>(kind: MessageType, payload: &T) -> Result<Value> {
    serde_json::to_value(payload).map_err(|e| Error::payload(kind.as_str(), e.to_string()))
}

/// Processes one message type
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a sequenced envelope and return what to publish, in order
    async fn apply(&self, ctx: &HandlerContext<'_>, envelope: Envelope) -> Result<Vec<Outbound>>;
}

/// Message type to handler lookup
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl HandlerTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table covering every client-originated type
    #[must_use]
    pub fn standard() -> Self {
        let mutation: Arc<dyn MessageHandler> = Arc::new(MutationHandler);
        let passthrough: Arc<dyn MessageHandler> = Arc::new(PassthroughHandler);

        let mut table = Self::new();
        for kind in [
            MessageType::ElementCreate,
            MessageType::ElementDelete,
            MessageType::PageCreate,
            MessageType::PageUpdate,
            MessageType::PageDelete,
        ] {
            table.register(kind, mutation.clone());
        }
        table.register(MessageType::ElementUpdate, Arc::new(ElementUpdateHandler));
        table.register(MessageType::StrokeAppend, Arc::new(StrokeAppendHandler));
        table.register(MessageType::StrokeEnd, Arc::new(StrokeEndHandler));
        table.register(MessageType::UserCursor, passthrough.clone());
        table.register(MessageType::PageSwitch, passthrough);
        table.register(MessageType::UserJoin, Arc::new(JoinHandler));
        table.register(MessageType::UserLeave, Arc::new(LeaveHandler));
        table.register(MessageType::SyncRequest, Arc::new(SyncRequestHandler));
        table.register(MessageType::ElementLockRequest, Arc::new(LockRequestHandler));
        table.register(MessageType::ElementLockRelease, Arc::new(LockReleaseHandler));
        table
    }

    /// Install or replace the handler for a type
    pub fn register(&mut self, kind: MessageType, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Handler for a type
    #[must_use]
    pub fn get(&self, kind: MessageType) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Number of registered types
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no type is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
