//! Integration tests for Sketchwire
//!
//! These tests drive `BroadcastRouter` end to end with the in-memory
//! coordination store, document store and hub:
//! - lock contention and expiry
//! - late-joiner stroke replay
//! - chunked sync
//! - sequencing and versioning guarantees
//! - lock reclaim on leave and disconnect
//! - ingress rate limiting and input rejection

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use sketchwire_collab::{
    BroadcastRouter, CollabConfig, Connection, DocumentStore, Envelope, Error, InboundChannel,
    LimitScope, ManualClock, MemoryDocumentStore, MessageType, Outbound, Publisher,
    RouteOutcome, Subscription,
};

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    router: Arc<BroadcastRouter>,
    clock: Arc<ManualClock>,
    documents: Arc<MemoryDocumentStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(CollabConfig::default())
    }

    fn with_config(config: CollabConfig) -> Self {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let documents = Arc::new(MemoryDocumentStore::new());
        let router = BroadcastRouter::builder(config)
            .clock(clock.clone())
            .documents(documents.clone())
            .build()
            .unwrap();
        Self {
            router: Arc::new(router),
            clock,
            documents,
        }
    }

    async fn send(&self, conn: &Connection, kind: &str, payload: Value) -> RouteOutcome {
        self.router
            .route(conn, InboundChannel::Action, json!({"type": kind, "payload": payload}))
            .await
    }

    async fn stroke(&self, conn: &Connection, payload: Value) -> RouteOutcome {
        self.router
            .route(
                conn,
                InboundChannel::Stroke,
                json!({"type": "STROKE_APPEND", "payload": payload}),
            )
            .await
    }

    async fn version(&self, project_id: &str) -> u64 {
        let session = self.router.sessions().get(project_id).unwrap();
        session.allocator().current_version().await.unwrap()
    }

    async fn sequence(&self, project_id: &str) -> u64 {
        let session = self.router.sessions().get(project_id).unwrap();
        session.allocator().current_sequence().await.unwrap()
    }
}

fn drain(subscription: &mut Subscription) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Some(frame) = subscription.try_recv() {
        out.push((*frame.envelope).clone());
    }
    out
}

fn kinds(envelopes: &[Envelope]) -> Vec<MessageType> {
    envelopes.iter().map(|e| e.kind).collect()
}

fn processed_seq(outcome: RouteOutcome) -> u64 {
    match outcome {
        RouteOutcome::Processed { seq, .. } => seq,
        other => panic!("expected processed, got {:?}", other),
    }
}

// ============================================================================
// Locks
// ============================================================================

#[tokio::test]
async fn test_lock_contention_then_expiry() {
    let h = Harness::new();
    let (alice, mut alice_rx) = h.router.connect("p1", "alice");
    let (bob, mut bob_rx) = h.router.connect("p1", "bob");

    h.send(&alice, "ELEMENT_LOCK_REQUEST", json!({"elementId": "e1"})).await;

    let alice_seen = drain(&mut alice_rx);
    assert_eq!(
        kinds(&alice_seen),
        vec![MessageType::LockGranted, MessageType::ElementLock]
    );
    assert!(alice_seen[0].payload["lockToken"].is_string());
    assert_eq!(alice_seen[0].payload["expiresAt"], 31_000);

    let bob_seen = drain(&mut bob_rx);
    assert_eq!(kinds(&bob_seen), vec![MessageType::ElementLock]);
    assert_eq!(bob_seen[0].payload["lockedBy"], "alice");
    assert!(bob_seen[0].payload.get("lockToken").is_none());

    // Held: bob's edit bounces back to bob only
    h.send(&bob, "ELEMENT_UPDATE", json!({"elementId": "e1", "changes": {"x": 5}}))
        .await;
    let bob_seen = drain(&mut bob_rx);
    assert_eq!(kinds(&bob_seen), vec![MessageType::ServerReject]);
    assert_eq!(bob_seen[0].payload["reason"], "ELEMENT_LOCKED");
    assert!(drain(&mut alice_rx).is_empty());
    assert_eq!(h.version("p1").await, 0);

    // A competing lock request is refused with the holder named
    h.send(&bob, "ELEMENT_LOCK_REQUEST", json!({"elementId": "e1"})).await;
    let bob_seen = drain(&mut bob_rx);
    assert_eq!(kinds(&bob_seen), vec![MessageType::LockRejected]);
    assert_eq!(bob_seen[0].payload["lockedBy"], "alice");

    // Expired: the same edit goes through
    h.clock.advance(30_001);
    h.send(&bob, "ELEMENT_UPDATE", json!({"elementId": "e1", "changes": {"x": 5}}))
        .await;
    let alice_seen = drain(&mut alice_rx);
    assert_eq!(kinds(&alice_seen), vec![MessageType::ElementUpdate]);
    assert_eq!(alice_seen[0].version, Some(1));
    assert_eq!(alice_seen[0].user_id, "bob");
}

#[tokio::test]
async fn test_non_owner_update_is_rejected_however_addressed() {
    let h = Harness::new();
    h.documents.seed("p1", vec![json!({"id": "e1", "x": 0})]).unwrap();
    let (alice, mut alice_rx) = h.router.connect("p1", "alice");
    let (bob, mut bob_rx) = h.router.connect("p1", "bob");

    h.send(&alice, "ELEMENT_LOCK_REQUEST", json!({"elementId": "e1"})).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    // Addressed only through the inline element
    h.send(&bob, "ELEMENT_UPDATE", json!({"element": {"id": "e1", "x": 666}}))
        .await;
    let bob_seen = drain(&mut bob_rx);
    assert_eq!(kinds(&bob_seen), vec![MessageType::ServerReject]);
    assert_eq!(bob_seen[0].payload["reason"], "ELEMENT_LOCKED");

    // A badly typed flag must not erase the target
    assert_eq!(
        h.send(
            &bob,
            "ELEMENT_UPDATE",
            json!({"elementId": "e1", "transient": "no", "x": 9})
        )
        .await,
        RouteOutcome::Dropped { code: "malformed_payload" }
    );

    assert!(drain(&mut alice_rx).is_empty());
    assert_eq!(h.version("p1").await, 0);
    assert_eq!(
        h.documents.elements("p1").await.unwrap(),
        vec![json!({"id": "e1", "x": 0})]
    );
}

#[tokio::test]
async fn test_only_owner_release_is_announced() {
    let h = Harness::new();
    let (alice, _alice_rx) = h.router.connect("p1", "alice");
    let (bob, mut bob_rx) = h.router.connect("p1", "bob");

    h.send(&alice, "ELEMENT_LOCK_REQUEST", json!({"elementId": "e1"})).await;
    drain(&mut bob_rx);

    h.send(&bob, "ELEMENT_LOCK_RELEASE", json!({"elementId": "e1"})).await;
    assert!(drain(&mut bob_rx).is_empty());

    h.send(&alice, "ELEMENT_LOCK_RELEASE", json!({"elementId": "e1"})).await;
    let bob_seen = drain(&mut bob_rx);
    assert_eq!(kinds(&bob_seen), vec![MessageType::LockReleased]);
    assert_eq!(bob_seen[0].payload["elementId"], "e1");
    assert!(bob_seen[0].seq.is_some());
}

#[tokio::test]
async fn test_leave_releases_every_lock_before_announcing() {
    let h = Harness::new();
    let (alice, _alice_rx) = h.router.connect("p1", "alice");
    let (_bob, mut bob_rx) = h.router.connect("p1", "bob");

    h.send(&alice, "ELEMENT_LOCK_REQUEST", json!({"elementId": "e1"})).await;
    h.send(&alice, "ELEMENT_LOCK_REQUEST", json!({"elementId": "e2"})).await;
    drain(&mut bob_rx);

    h.send(&alice, "USER_LEAVE", json!({})).await;
    let bob_seen = drain(&mut bob_rx);
    assert_eq!(
        kinds(&bob_seen),
        vec![
            MessageType::LockReleased,
            MessageType::LockReleased,
            MessageType::UserLeave
        ]
    );

    let session = h.router.sessions().get("p1").unwrap();
    assert!(session.locks().snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_locks_reclaimed_when_last_connection_closes() {
    let h = Harness::new();
    let (alice_tab1, _rx1) = h.router.connect("p1", "alice");
    let (alice_tab2, _rx2) = h.router.connect("p1", "alice");
    let (bob, mut bob_rx) = h.router.connect("p1", "bob");

    h.send(&alice_tab1, "ELEMENT_LOCK_REQUEST", json!({"elementId": "e1"})).await;
    drain(&mut bob_rx);

    // Still connected in another tab
    h.router.disconnect(&alice_tab1).await;
    assert!(drain(&mut bob_rx).is_empty());

    h.router.disconnect(&alice_tab2).await;
    let bob_seen = drain(&mut bob_rx);
    assert_eq!(kinds(&bob_seen), vec![MessageType::LockReleased]);

    h.send(&bob, "ELEMENT_LOCK_REQUEST", json!({"elementId": "e1"})).await;
    assert_eq!(drain(&mut bob_rx)[0].kind, MessageType::LockGranted);
}

// ============================================================================
// Strokes
// ============================================================================

#[tokio::test]
async fn test_late_joiner_receives_stroke_in_progress() {
    let h = Harness::new();
    let (alice, mut alice_rx) = h.router.connect("p1", "alice");

    h.stroke(
        &alice,
        json!({
            "strokeId": "s1",
            "pageId": "page-1",
            "strokeInit": {"color": "#ff0000"},
            "points": [[0, 0], [1, 1]]
        }),
    )
    .await;
    h.stroke(&alice, json!({"strokeId": "s1", "points": [[2, 2]]})).await;
    h.stroke(&alice, json!({"strokeId": "s1", "points": [[3, 3]]})).await;
    assert_eq!(drain(&mut alice_rx).len(), 3);

    let (bob, mut bob_rx) = h.router.connect("p1", "bob");
    let join_seq = processed_seq(h.send(&bob, "USER_JOIN", json!({})).await);

    let bob_seen = drain(&mut bob_rx);
    assert_eq!(
        kinds(&bob_seen),
        vec![MessageType::UserJoin, MessageType::StrokeInit]
    );
    let init = &bob_seen[1];
    assert_eq!(init.seq, Some(join_seq));
    assert_eq!(init.user_id, "alice");
    assert_eq!(init.payload["strokeId"], "s1");
    assert_eq!(init.payload["tool"], "pen");
    assert_eq!(init.payload["color"], "#ff0000");
    assert_eq!(init.payload["strokeWidth"], 2.0);
    assert_eq!(init.payload["points"].as_array().unwrap().len(), 3);

    // Alice sees the join but no replay
    assert_eq!(kinds(&drain(&mut alice_rx)), vec![MessageType::UserJoin]);
}

#[tokio::test]
async fn test_stroke_end_commits_and_clears_replay() {
    let h = Harness::new();
    let (alice, _alice_rx) = h.router.connect("p1", "alice");

    h.stroke(
        &alice,
        json!({"strokeId": "s1", "strokeInit": {}, "points": [[0, 0]]}),
    )
    .await;
    h.send(
        &alice,
        "STROKE_END",
        json!({"strokeId": "s1", "element": {"id": "s1", "type": "stroke"}}),
    )
    .await;

    assert_eq!(h.version("p1").await, 1);
    assert_eq!(h.documents.element_count("p1"), 1);

    let (bob, mut bob_rx) = h.router.connect("p1", "bob");
    h.send(&bob, "USER_JOIN", json!({})).await;
    assert_eq!(kinds(&drain(&mut bob_rx)), vec![MessageType::UserJoin]);
}

#[tokio::test]
async fn test_strokes_survive_disconnect() {
    let h = Harness::new();
    let (alice, _alice_rx) = h.router.connect("p1", "alice");
    h.stroke(
        &alice,
        json!({"strokeId": "s1", "strokeInit": {}, "points": [[0, 0]]}),
    )
    .await;
    h.router.disconnect(&alice).await;

    let (bob, mut bob_rx) = h.router.connect("p1", "bob");
    h.send(&bob, "USER_JOIN", json!({})).await;
    assert_eq!(
        kinds(&drain(&mut bob_rx)),
        vec![MessageType::UserJoin, MessageType::StrokeInit]
    );
}

#[tokio::test]
async fn test_stroke_channel_only_accepts_appends() {
    let h = Harness::new();
    let (alice, _alice_rx) = h.router.connect("p1", "alice");

    let outcome = h
        .router
        .route(
            &alice,
            InboundChannel::Stroke,
            json!({"type": "ELEMENT_CREATE", "payload": {"element": {"id": "e1"}}}),
        )
        .await;
    assert_eq!(outcome, RouteOutcome::Dropped { code: "channel_mismatch" });
    assert_eq!(h.sequence("p1").await, 0);
}

// ============================================================================
// Sync
// ============================================================================

#[tokio::test]
async fn test_sync_streams_chunks_to_requester_only() {
    let h = Harness::new();
    h.documents
        .seed("p1", (0..250).map(|i| json!({"id": format!("e{:03}", i)})))
        .unwrap();

    let (alice, mut alice_rx) = h.router.connect("p1", "alice");
    let (_bob, mut bob_rx) = h.router.connect("p1", "bob");
    h.send(&alice, "ELEMENT_LOCK_REQUEST", json!({"elementId": "e007"})).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    let request_seq = processed_seq(h.send(&alice, "SYNC_REQUEST", json!({"fromVersion": 0})).await);

    let seen = drain(&mut alice_rx);
    assert_eq!(
        kinds(&seen),
        vec![
            MessageType::SyncResponseStart,
            MessageType::SyncResponseChunk,
            MessageType::SyncResponseChunk,
            MessageType::SyncResponseChunk,
            MessageType::SyncResponseEnd,
        ]
    );
    assert_eq!(seen[0].payload["totalChunks"], 3);
    let sizes: Vec<usize> = seen[1..4]
        .iter()
        .map(|e| e.payload["elements"].as_array().unwrap().len())
        .collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(seen[3].payload["chunkIndex"], 2);

    let end = &seen[4];
    assert_eq!(end.seq, Some(request_seq));
    assert_eq!(end.payload["seq"], request_seq);
    assert_eq!(end.payload["version"], 0);
    assert_eq!(end.payload["lockSnapshot"]["e007"]["lockedBy"], "alice");
    assert!(seen.iter().all(|e| e.user_id == "server"));

    assert!(drain(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn test_sync_of_empty_project() {
    let h = Harness::new();
    let (alice, mut alice_rx) = h.router.connect("p1", "alice");

    h.send(&alice, "SYNC_REQUEST", json!({})).await;
    let seen = drain(&mut alice_rx);
    assert_eq!(
        kinds(&seen),
        vec![MessageType::SyncResponseStart, MessageType::SyncResponseEnd]
    );
    assert_eq!(seen[0].payload["totalChunks"], 0);
}

// ============================================================================
// Sequencing and versioning
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_senders_get_gapless_sequence() {
    let h = Harness::new();
    let mut tasks = Vec::new();

    for user in ["alice", "bob", "carol", "dave"] {
        let router = h.router.clone();
        let (conn, _rx) = router.connect("p1", user);
        tasks.push(tokio::spawn(async move {
            let mut seqs = Vec::new();
            for i in 0..25 {
                let outcome = router
                    .route(
                        &conn,
                        InboundChannel::Action,
                        json!({"type": "USER_CURSOR", "payload": {"x": i, "y": i}}),
                    )
                    .await;
                if let RouteOutcome::Processed { seq, .. } = outcome {
                    seqs.push(seq);
                }
            }
            seqs
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        let seqs = task.await.unwrap();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        all.extend(seqs);
    }
    all.sort_unstable();
    assert_eq!(all, (1..=100).collect::<Vec<u64>>());
    assert_eq!(h.version("p1").await, 0);
}

#[tokio::test]
async fn test_version_moves_only_for_mutations() {
    let h = Harness::new();
    let (alice, mut alice_rx) = h.router.connect("p1", "alice");

    h.send(&alice, "ELEMENT_CREATE", json!({"element": {"id": "e1"}})).await;
    h.send(&alice, "USER_CURSOR", json!({"x": 1})).await;
    h.send(&alice, "ELEMENT_UPDATE", json!({"elementId": "e1", "transient": true}))
        .await;
    h.send(&alice, "PAGE_SWITCH", json!({"pageId": "page-2"})).await;
    h.send(&alice, "PAGE_CREATE", json!({"page": {"id": "page-2"}})).await;
    h.send(&alice, "ELEMENT_DELETE", json!({"elementId": "e1"})).await;

    let versions: Vec<(MessageType, Option<u64>)> = drain(&mut alice_rx)
        .iter()
        .map(|e| (e.kind, e.version))
        .collect();
    assert_eq!(
        versions,
        vec![
            (MessageType::ElementCreate, Some(1)),
            (MessageType::UserCursor, None),
            (MessageType::ElementUpdate, None),
            (MessageType::PageSwitch, None),
            (MessageType::PageCreate, Some(2)),
            (MessageType::ElementDelete, Some(3)),
        ]
    );
    assert_eq!(h.version("p1").await, 3);
    assert_eq!(h.documents.element_count("p1"), 0);
}

#[tokio::test]
async fn test_projects_are_sequenced_independently() {
    let h = Harness::new();
    let (a, _a_rx) = h.router.connect("p1", "alice");
    let (b, _b_rx) = h.router.connect("p2", "alice");

    assert_eq!(processed_seq(h.send(&a, "USER_CURSOR", json!({})).await), 1);
    assert_eq!(processed_seq(h.send(&a, "USER_CURSOR", json!({})).await), 2);
    assert_eq!(processed_seq(h.send(&b, "USER_CURSOR", json!({})).await), 1);
}

#[tokio::test]
async fn test_envelopes_carry_server_identity_and_time() {
    let h = Harness::new();
    let (alice, mut alice_rx) = h.router.connect("p1", "alice");

    h.router
        .route(
            &alice,
            InboundChannel::Action,
            json!({
                "type": "USER_CURSOR",
                "userId": "mallory",
                "projectId": "p9",
                "seq": 77,
                "payload": {"x": 1}
            }),
        )
        .await;

    let seen = drain(&mut alice_rx);
    assert_eq!(seen[0].user_id, "alice");
    assert_eq!(seen[0].project_id, "p1");
    assert_eq!(seen[0].seq, Some(1));
    assert_eq!(seen[0].timestamp, Some(1_000));
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_rate_limited_messages_consume_no_sequence() {
    let mut config = CollabConfig::default();
    config.rate_limit.user_per_second = 3;
    let h = Harness::with_config(config);
    let (alice, mut alice_rx) = h.router.connect("p1", "alice");

    for _ in 0..3 {
        assert!(matches!(
            h.send(&alice, "USER_CURSOR", json!({})).await,
            RouteOutcome::Processed { .. }
        ));
    }
    assert_eq!(
        h.send(&alice, "USER_CURSOR", json!({})).await,
        RouteOutcome::RateLimited(LimitScope::User)
    );
    assert_eq!(h.sequence("p1").await, 3);

    let seen = drain(&mut alice_rx);
    let reject = seen.last().unwrap();
    assert_eq!(reject.kind, MessageType::ServerReject);
    assert_eq!(reject.payload["reason"], "RATE_LIMITED");
    assert_eq!(reject.seq, None);
}

#[tokio::test]
async fn test_rate_limit_can_be_disabled() {
    let mut config = CollabConfig::default();
    config.rate_limit.enabled = false;
    config.rate_limit.user_per_second = 1;
    let h = Harness::with_config(config);
    let (alice, _alice_rx) = h.router.connect("p1", "alice");

    for _ in 0..5 {
        assert!(matches!(
            h.send(&alice, "USER_CURSOR", json!({})).await,
            RouteOutcome::Processed { .. }
        ));
    }
}

#[tokio::test]
async fn test_bad_input_is_dropped_before_sequencing() {
    let h = Harness::new();
    let (alice, mut alice_rx) = h.router.connect("p1", "alice");

    assert_eq!(
        h.send(&alice, "LOCK_GRANTED", json!({"elementId": "e1"})).await,
        RouteOutcome::Dropped { code: "channel_mismatch" }
    );
    assert_eq!(
        h.send(&alice, "ELEMENT_TELEPORT", json!({})).await,
        RouteOutcome::Dropped { code: "unknown_type" }
    );
    assert_eq!(
        h.router
            .route_text(&alice, InboundChannel::Action, "{not json")
            .await,
        RouteOutcome::Dropped { code: "malformed_envelope" }
    );
    assert_eq!(
        h.send(&alice, "ELEMENT_LOCK_REQUEST", json!({"nothing": true})).await,
        RouteOutcome::Dropped { code: "malformed_payload" }
    );

    assert!(drain(&mut alice_rx).is_empty());
    // The malformed lock payload was sequenced before its handler failed.
    assert_eq!(h.sequence("p1").await, 1);
}

// ============================================================================
// Delivery failures and lifecycle
// ============================================================================

#[derive(Default)]
struct FailingPublisher {
    attempts: Mutex<Vec<MessageType>>,
}

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, outbound: Outbound) -> sketchwire_collab::Result<usize> {
        self.attempts.lock().unwrap().push(outbound.envelope.kind);
        Err(Error::publish("broker unavailable"))
    }
}

#[tokio::test]
async fn test_publish_failure_keeps_committed_state() {
    let publisher = Arc::new(FailingPublisher::default());
    let documents = Arc::new(MemoryDocumentStore::new());
    let router = BroadcastRouter::builder(CollabConfig::default())
        .publisher(publisher.clone())
        .documents(documents.clone())
        .build()
        .unwrap();
    let (alice, _rx) = router.connect("p1", "alice");

    let outcome = router
        .route(
            &alice,
            InboundChannel::Action,
            json!({"type": "ELEMENT_CREATE", "payload": {"element": {"id": "e1"}}}),
        )
        .await;

    assert!(matches!(outcome, RouteOutcome::Processed { seq: 1, .. }));
    assert_eq!(documents.element_count("p1"), 1);
    let session = router.sessions().get("p1").unwrap();
    assert_eq!(session.allocator().current_version().await.unwrap(), 1);
    assert_eq!(*publisher.attempts.lock().unwrap(), vec![MessageType::ElementCreate]);
}

#[tokio::test]
async fn test_idle_session_eviction_resets_counters() {
    let mut config = CollabConfig::default();
    config.session_idle_secs = 1;
    let h = Harness::with_config(config);

    let (alice, _rx) = h.router.connect("p1", "alice");
    h.send(&alice, "USER_CURSOR", json!({})).await;

    // Subscribed sessions are never evicted
    h.clock.advance(5_000);
    assert!(h.router.evict_idle().await.is_empty());

    h.router.disconnect(&alice).await;
    drop(_rx);
    h.clock.advance(5_000);
    assert_eq!(h.router.evict_idle().await, vec!["p1".to_string()]);
    assert!(h.router.sessions().is_empty());

    let (alice, _rx) = h.router.connect("p1", "alice");
    assert_eq!(processed_seq(h.send(&alice, "USER_CURSOR", json!({})).await), 1);
}
