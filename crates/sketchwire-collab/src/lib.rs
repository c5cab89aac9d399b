//! Sketchwire Collab - real-time collaboration engine for shared canvases
//!
//! This crate coordinates a project's participants:
//! - Envelope: the typed wire message and its inbound channels
//! - Allocator: per-project sequence numbers and document versions
//! - Lock: per-element leases with lazy expiry
//! - Stroke: registry of in-progress strokes for late joiners
//! - Sync: chunked full-state transfer to one connection
//! - Router: ingress ordering, dispatch, publication
//! - Hub: bounded per-connection fan-out
//! - Store: coordination state behind an atomic-operation seam
//!
//! ## Usage
//!
//! ```ignore
//! use sketchwire_collab::{BroadcastRouter, CollabConfig, InboundChannel};
//!
//! let router = BroadcastRouter::builder(CollabConfig::default()).build()?;
//! let (conn, mut frames) = router.connect("project-1", "alice");
//!
//! router
//!     .route_text(&conn, InboundChannel::Action, r#"{"type":"USER_JOIN"}"#)
//!     .await;
//!
//! while let Some(frame) = frames.recv().await {
//!     println!("{} {}", frame.topic, frame.text);
//! }
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [collab]
//! lock_max_ttl_ms = 30000
//! sync_chunk_size = 100
//! outbound_queue_capacity = 256
//!
//! [collab.rate_limit]
//! user_per_second = 100
//! project_per_second = 500
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod allocator;
pub mod clock;
pub mod config;
pub mod document;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod identity;
pub mod lock;
pub mod payload;
pub mod rate_limit;
pub mod router;
pub mod session;
pub mod store;
pub mod stroke;
pub mod sync;

// Re-export main types
pub use allocator::SequenceAllocator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CollabConfig, RateLimitSettings};
pub use document::{DocumentStore, MemoryDocumentStore};
pub use envelope::{project_topic, Envelope, InboundChannel, MessageType, ProjectId, SERVER_USER};
pub use error::{Error, Result};
pub use handlers::{HandlerContext, HandlerTable, MessageHandler};
pub use hub::{ConnectionId, Delivery, Frame, Hub, Outbound, Publisher, Subscription};
pub use identity::{ConnectRequest, ForwardedIdentity, IdentityResolver};
pub use lock::{LockGrant, LockManager, LockOutcome, UpdateCheck};
pub use rate_limit::{IngressLimiter, LimitScope};
pub use router::{BroadcastRouter, Connection, RouteOutcome, RouterBuilder};
pub use session::{ProjectSession, SessionRegistry};
pub use store::{CoordinationStore, MemoryCoordinationStore};
pub use stroke::{ActiveStrokeRegistry, AppendOutcome};
pub use sync::SyncCoordinator;
