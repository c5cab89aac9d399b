//! Coordination store
//!
//! Per-project counters, the lock table and the active-stroke table live
//! behind [`CoordinationStore`], which only offers atomic primitives
//! (increment, compare-and-swap, append). Protocol logic is written against
//! the trait, so a multi-instance deployment can back it with an external
//! strongly-consistent store.

mod memory;

pub use memory::MemoryCoordinationStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Per-project monotonic counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Assigned to every processed message
    Sequence,
    /// Advanced by durable mutations only
    Version,
}

/// One entry of the lock table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// User holding the lock
    pub owner_id: String,
    /// Opaque token handed out on grant
    pub token: String,
    /// Expiry, epoch milliseconds
    pub expires_at: i64,
}

impl LockRecord {
    /// A lock is live strictly before its expiry instant
    #[must_use]
    pub fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at > now_ms
    }
}

/// Metadata captured from the first append of a stroke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeMeta {
    /// Drawing user
    pub owner_id: String,
    /// Page the stroke is drawn on
    pub page_id: Value,
    /// Drawing tool
    pub tool: Option<String>,
    /// Stroke color
    pub color: Option<String>,
    /// Stroke width
    pub stroke_width: Option<f64>,
}

/// A stroke with its accumulated point-delta blocks
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeRecord {
    /// Stroke id
    pub stroke_id: String,
    /// Metadata from the first append
    pub meta: StrokeMeta,
    /// Opaque blocks in append order
    pub blocks: Vec<Value>,
}

/// Atomic primitives over per-project coordination state
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Post-increment a counter; the first call for a project returns 1
    async fn increment(&self, project_id: &str, counter: Counter) -> Result<u64>;

    /// Read a counter without changing it
    async fn load(&self, project_id: &str, counter: Counter) -> Result<u64>;

    /// Read one lock entry
    async fn get_lock(&self, project_id: &str, element_id: &str) -> Result<Option<LockRecord>>;

    /// Replace the lock entry if it still equals `expected`.
    ///
    /// `expected = None` means "no entry", `new = None` removes the entry.
    /// Returns `false` when another writer got there first.
    async fn compare_and_swap_lock(
        &self,
        project_id: &str,
        element_id: &str,
        expected: Option<&LockRecord>,
        new: Option<LockRecord>,
    ) -> Result<bool>;

    /// Every lock entry of a project, expired ones included
    async fn locks(&self, project_id: &str) -> Result<Vec<(String, LockRecord)>>;

    /// Create a stroke entry unless one exists; returns whether it was created
    async fn insert_stroke_if_absent(
        &self,
        project_id: &str,
        stroke_id: &str,
        meta: StrokeMeta,
    ) -> Result<bool>;

    /// Append an opaque block; returns `false` if the stroke is unknown
    async fn append_stroke_block(
        &self,
        project_id: &str,
        stroke_id: &str,
        block: Value,
    ) -> Result<bool>;

    /// Atomically remove a stroke entry
    async fn remove_stroke(&self, project_id: &str, stroke_id: &str)
        -> Result<Option<StrokeRecord>>;

    /// Every active stroke of a project, in creation order
    async fn strokes(&self, project_id: &str) -> Result<Vec<StrokeRecord>>;

    /// Drop all state of a project
    async fn purge_project(&self, project_id: &str) -> Result<()>;
}
