//! Project sessions
//!
//! A session bundles the per-project components (allocator, locks, strokes)
//! and is created on first activity. Sessions with no subscribers that stay
//! idle past the configured threshold are evicted together with their
//! coordination state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

use crate::allocator::SequenceAllocator;
use crate::clock::Clock;
use crate::envelope::ProjectId;
use crate::lock::LockManager;
use crate::store::CoordinationStore;
use crate::stroke::ActiveStrokeRegistry;

/// Coordination state of one project
pub struct ProjectSession {
    project_id: ProjectId,
    allocator: SequenceAllocator,
    locks: LockManager,
    strokes: ActiveStrokeRegistry,
    /// Mutations hold the read side while committing; sync holds the write
    /// side while capturing its anchor version and element snapshot.
    commit_gate: RwLock<()>,
    created_at: DateTime<Utc>,
    last_active_ms: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl ProjectSession {
    fn new(
        project_id: &str,
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
        lock_max_ttl_ms: u64,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            allocator: SequenceAllocator::new(project_id, store.clone()),
            locks: LockManager::new(project_id, store.clone(), clock.clone())
                .with_max_ttl_ms(lock_max_ttl_ms),
            strokes: ActiveStrokeRegistry::new(project_id, store),
            commit_gate: RwLock::new(()),
            created_at: Utc::now(),
            last_active_ms: AtomicI64::new(clock.now_ms()),
            clock,
        }
    }

    /// Project id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.project_id
    }

    /// Sequence & version counters
    #[must_use]
    pub fn allocator(&self) -> &SequenceAllocator {
        &self.allocator
    }

    /// Lock table
    #[must_use]
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Active strokes
    #[must_use]
    pub fn strokes(&self) -> &ActiveStrokeRegistry {
        &self.strokes
    }

    /// When the session was created
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Record activity
    pub fn touch(&self) {
        self.last_active_ms
            .store(self.clock.now_ms(), Ordering::Relaxed);
    }

    /// Milliseconds since the last activity
    #[must_use]
    pub fn idle_ms(&self) -> i64 {
        self.clock
            .now_ms()
            .saturating_sub(self.last_active_ms.load(Ordering::Relaxed))
    }

    /// Enter a commit; many commits may run at once
    pub async fn begin_commit(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    /// Wait for in-flight commits and hold new ones off
    pub async fn quiesce(&self) -> RwLockWriteGuard<'_, ()> {
        self.commit_gate.write().await
    }
}

/// All live project sessions
pub struct SessionRegistry {
    sessions: DashMap<ProjectId, Arc<ProjectSession>>,
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    lock_max_ttl_ms: u64,
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>, clock: Arc<dyn Clock>, lock_max_ttl_ms: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            clock,
            lock_max_ttl_ms,
        }
    }

    /// Session for a project, created on first use
    pub fn get_or_create(&self, project_id: &str) -> Arc<ProjectSession> {
        if let Some(session) = self.sessions.get(project_id) {
            return session.clone();
        }
        self.sessions
            .entry(project_id.to_string())
            .or_insert_with(|| {
                info!(project_id, "Project session created");
                Arc::new(ProjectSession::new(
                    project_id,
                    self.store.clone(),
                    self.clock.clone(),
                    self.lock_max_ttl_ms,
                ))
            })
            .clone()
    }

    /// Existing session, if any
    #[must_use]
    pub fn get(&self, project_id: &str) -> Option<Arc<ProjectSession>> {
        self.sessions.get(project_id).map(|s| s.clone())
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evict sessions idle longer than `max_idle` for which `in_use` is false.
    ///
    /// Eviction purges the project's coordination state, so counters restart
    /// when the project becomes active again.
    pub async fn evict_idle(&self, max_idle: Duration, in_use: impl Fn(&str) -> bool) -> Vec<ProjectId> {
        let max_idle_ms = i64::try_from(max_idle.as_millis()).unwrap_or(i64::MAX);
        let candidates: Vec<ProjectId> = self
            .sessions
            .iter()
            .filter(|s| s.idle_ms() > max_idle_ms && !in_use(s.key().as_str()))
            .map(|s| s.key().clone())
            .collect();

        let mut evicted = Vec::new();
        for project_id in candidates {
            let removed = self.sessions.remove_if(&project_id, |key, session| {
                session.idle_ms() > max_idle_ms && !in_use(key.as_str())
            });
            if removed.is_none() {
                continue;
            }
            if let Err(e) = self.store.purge_project(&project_id).await {
                warn!(project_id = %project_id, error = %e, "Failed to purge evicted project");
            }
            info!(project_id = %project_id, "Idle project session evicted");
            evicted.push(project_id);
        }
        evicted
    }
}
