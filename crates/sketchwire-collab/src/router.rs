//! Broadcast Router
//!
//! Single entry point for inbound messages. For each message, in order:
//! decode and validate, apply the ingress rate limit, assign `seq` and
//! `timestamp`, dispatch to the handler for its type, publish the results.
//! Anything dropped before sequencing never consumes a sequence number.
//!
//! Messages of different projects share nothing but the maps the sessions
//! live in; messages of one project are processed concurrently and ordered
//! only by their sequence numbers.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::CollabConfig;
use crate::document::{DocumentStore, MemoryDocumentStore};
use crate::envelope::{Envelope, InboundChannel, MessageType, ProjectId};
use crate::error::{Error, Result};
use crate::handlers::{release_all_for, HandlerContext, HandlerTable, MessageHandler};
use crate::hub::{ConnectionId, Hub, Outbound, Publisher, Subscription};
use crate::payload::ServerReject;
use crate::rate_limit::{IngressLimiter, LimitScope};
use crate::session::SessionRegistry;
use crate::store::{CoordinationStore, MemoryCoordinationStore};
use crate::sync::SyncCoordinator;

/// An open client connection bound to one project and one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Project from the channel address
    pub project_id: ProjectId,
    /// Authenticated user
    pub user_id: String,
    /// Connection id used for targeted replies
    pub connection_id: ConnectionId,
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Sequenced and handled
    Processed {
        /// Sequence number assigned to the message
        seq: u64,
        /// Envelopes the handler produced
        published: usize,
    },
    /// Refused by the ingress limiter before sequencing
    RateLimited(LimitScope),
    /// Discarded; `code` is the error code
    Dropped {
        /// Error code of the reason
        code: &'static str,
    },
}

/// Builder for [`BroadcastRouter`]
pub struct RouterBuilder {
    config: CollabConfig,
    store: Option<Arc<dyn CoordinationStore>>,
    documents: Option<Arc<dyn DocumentStore>>,
    clock: Option<Arc<dyn Clock>>,
    publisher: Option<Arc<dyn Publisher>>,
    handlers: HandlerTable,
}

impl RouterBuilder {
    /// Coordination store (defaults to in-memory)
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Persistence collaborator (defaults to in-memory)
    #[must_use]
    pub fn documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Clock (defaults to the system clock)
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Outbound publisher (defaults to the router's own hub)
    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Install or replace the handler for one type
    #[must_use]
    pub fn handler(mut self, kind: MessageType, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.register(kind, handler);
        self
    }

    /// Validate the configuration and build the router
    pub fn build(self) -> Result<BroadcastRouter> {
        self.config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCoordinationStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let hub = Arc::new(Hub::new(self.config.outbound_queue_capacity));
        let publisher = self
            .publisher
            .unwrap_or_else(|| hub.clone() as Arc<dyn Publisher>);

        Ok(BroadcastRouter {
            sessions: SessionRegistry::new(store, clock.clone(), self.config.lock_max_ttl_ms),
            documents: self
                .documents
                .unwrap_or_else(|| Arc::new(MemoryDocumentStore::new())),
            limiter: IngressLimiter::from_settings(&self.config.rate_limit),
            sync: SyncCoordinator::new(self.config.sync_chunk_size),
            handlers: self.handlers,
            hub,
            publisher,
            clock,
            config: self.config,
        })
    }
}

/// Routes inbound messages of every project
pub struct BroadcastRouter {
    sessions: SessionRegistry,
    hub: Arc<Hub>,
    publisher: Arc<dyn Publisher>,
    documents: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    limiter: Option<IngressLimiter>,
    handlers: HandlerTable,
    sync: SyncCoordinator,
    config: CollabConfig,
}

impl BroadcastRouter {
    /// Start building a router with the standard handler table
    #[must_use]
    pub fn builder(config: CollabConfig) -> RouterBuilder {
        RouterBuilder {
            config,
            store: None,
            documents: None,
            clock: None,
            publisher: None,
            handlers: HandlerTable::standard(),
        }
    }

    /// Live project sessions
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Subscription hub
    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    /// Open a connection to a project and subscribe it to the project topic
    pub fn connect(&self, project_id: &str, user_id: &str) -> (Connection, Subscription) {
        let connection = Connection {
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            connection_id: Uuid::new_v4(),
        };
        self.sessions.get_or_create(project_id).touch();
        let subscription = self
            .hub
            .subscribe(project_id, user_id, connection.connection_id);
        info!(
            project_id,
            user_id,
            connection_id = %connection.connection_id,
            "Connection opened"
        );
        (connection, subscription)
    }

    /// Close a connection.
    ///
    /// When it was the user's last connection in the project, every lock the
    /// user holds there is released and announced. In-progress strokes stay.
    pub async fn disconnect(&self, connection: &Connection) {
        self.hub
            .unsubscribe(&connection.project_id, connection.connection_id);
        info!(
            project_id = %connection.project_id,
            user_id = %connection.user_id,
            connection_id = %connection.connection_id,
            "Connection closed"
        );

        if self
            .hub
            .connections_of(&connection.project_id, &connection.user_id)
            > 0
        {
            return;
        }
        let Some(session) = self.sessions.get(&connection.project_id) else {
            return;
        };

        match release_all_for(&session, self.clock.as_ref(), &connection.user_id).await {
            Ok(released) => self.publish_all(released).await,
            Err(e) => warn!(
                project_id = %connection.project_id,
                user_id = %connection.user_id,
                error = %e,
                "Failed to reclaim locks on disconnect"
            ),
        }
    }

    /// Route a raw text frame
    pub async fn route_text(
        &self,
        connection: &Connection,
        channel: InboundChannel,
        raw: &str,
    ) -> RouteOutcome {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.route(connection, channel, value).await,
            Err(e) => self.drop_message(connection, &Error::from(e)),
        }
    }

    /// Route one already-parsed client message
    pub async fn route(
        &self,
        connection: &Connection,
        channel: InboundChannel,
        message: Value,
    ) -> RouteOutcome {
        let envelope = match Envelope::from_inbound_value(
            message,
            &connection.project_id,
            &connection.user_id,
            channel,
        ) {
            Ok(envelope) => envelope,
            Err(e) => return self.drop_message(connection, &e),
        };

        if let Some(limiter) = &self.limiter {
            if let Err(scope) = limiter.admit(&connection.project_id, &connection.user_id) {
                self.reject_rate_limited(connection, envelope.kind, scope)
                    .await;
                return RouteOutcome::RateLimited(scope);
            }
        }

        let Some(handler) = self.handlers.get(envelope.kind) else {
            return self.drop_message(
                connection,
                &Error::UnknownType(envelope.kind.to_string()),
            );
        };

        let session = self.sessions.get_or_create(&connection.project_id);
        session.touch();

        let seq = match session.allocator().next_sequence().await {
            Ok(seq) => seq,
            Err(e) => return self.drop_message(connection, &e),
        };
        let envelope = envelope
            .with_seq(seq)
            .with_timestamp(self.clock.now_ms());
        let kind = envelope.kind;

        let ctx = HandlerContext {
            session: &session,
            documents: self.documents.as_ref(),
            clock: self.clock.as_ref(),
            sync: &self.sync,
            origin: connection.connection_id,
        };

        match handler.apply(&ctx, envelope).await {
            Ok(outbound) => {
                let published = outbound.len();
                self.publish_all(outbound).await;
                RouteOutcome::Processed { seq, published }
            }
            Err(e) => {
                warn!(
                    project_id = %connection.project_id,
                    user_id = %connection.user_id,
                    kind = %kind,
                    seq,
                    code = e.code(),
                    error = %e,
                    "Handler failed, message dropped"
                );
                RouteOutcome::Dropped { code: e.code() }
            }
        }
    }

    /// Evict idle sessions nobody is subscribed to and prune limiter state
    pub async fn evict_idle(&self) -> Vec<ProjectId> {
        let hub = &self.hub;
        let evicted = self
            .sessions
            .evict_idle(self.config.session_idle(), |project| {
                hub.has_subscribers(project)
            })
            .await;
        if let Some(limiter) = &self.limiter {
            let pruned = limiter.cleanup();
            debug!(pruned, "Rate limiter keys pruned");
        }
        evicted
    }

    fn drop_message(&self, connection: &Connection, err: &Error) -> RouteOutcome {
        if err.is_client_input() {
            warn!(
                project_id = %connection.project_id,
                user_id = %connection.user_id,
                code = err.code(),
                error = %err,
                "Inbound message dropped"
            );
        } else {
            error!(
                project_id = %connection.project_id,
                user_id = %connection.user_id,
                code = err.code(),
                error = %err,
                "Inbound message dropped"
            );
        }
        RouteOutcome::Dropped { code: err.code() }
    }

    async fn reject_rate_limited(&self, connection: &Connection, kind: MessageType, scope: LimitScope) {
        warn!(
            project_id = %connection.project_id,
            user_id = %connection.user_id,
            kind = %kind,
            scope = ?scope,
            "Rate limit exceeded"
        );
        let message = match scope {
            LimitScope::User => "Too many messages from this user",
            LimitScope::Project => "Too many messages in this project",
        };
        let payload = serde_json::to_value(ServerReject {
            reason: "RATE_LIMITED".to_string(),
            message: message.to_string(),
            original_event_type: kind.as_str().to_string(),
        })
        .unwrap_or_else(|_| json!({"reason": "RATE_LIMITED"}));

        let envelope = Envelope::server(
            MessageType::ServerReject,
            connection.project_id.as_str(),
            connection.user_id.as_str(),
            payload,
        )
        .with_timestamp(self.clock.now_ms());
        self.publish_all(vec![Outbound::connection(connection.connection_id, envelope)])
            .await;
    }

    async fn publish_all(&self, outbound: Vec<Outbound>) {
        for mut item in outbound {
            if item.envelope.timestamp.is_none() {
                item.envelope.timestamp = Some(self.clock.now_ms());
            }
            let kind = item.envelope.kind;
            let project_id = item.envelope.project_id.clone();
            let seq = item.envelope.seq;
            match self.publisher.publish(item).await {
                Ok(delivered) => {
                    debug!(project_id = %project_id, kind = %kind, seq = ?seq, delivered, "Published");
                }
                Err(Error::SubscriberClosed(connection_id)) => {
                    debug!(project_id = %project_id, kind = %kind, connection_id = %connection_id, "Target connection gone");
                }
                Err(e) => {
                    warn!(project_id = %project_id, kind = %kind, seq = ?seq, error = %e, "Publish failed");
                }
            }
        }
    }
}
