//! In-process coordination store backed by `DashMap`.
//!
//! Each project gets its own tables; nothing is shared between projects
//! apart from the sharded outer map used to find them.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{CoordinationStore, Counter, LockRecord, StrokeMeta, StrokeRecord};
use crate::error::Result;

#[derive(Debug)]
struct StrokeEntry {
    ordinal: u64,
    meta: StrokeMeta,
    blocks: Vec<Value>,
}

#[derive(Debug, Default)]
struct ProjectTables {
    sequence: AtomicU64,
    version: AtomicU64,
    locks: DashMap<String, LockRecord>,
    strokes: DashMap<String, StrokeEntry>,
    stroke_ordinal: AtomicU64,
}

impl ProjectTables {
    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Sequence => &self.sequence,
            Counter::Version => &self.version,
        }
    }
}

/// `DashMap`-backed [`CoordinationStore`] for single-process deployments
#[derive(Debug, Default)]
pub struct MemoryCoordinationStore {
    projects: DashMap<String, Arc<ProjectTables>>,
}

impl MemoryCoordinationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of projects with live state
    #[must_use]
    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    fn tables(&self, project_id: &str) -> Arc<ProjectTables> {
        if let Some(tables) = self.projects.get(project_id) {
            return tables.clone();
        }
        self.projects
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    fn existing(&self, project_id: &str) -> Option<Arc<ProjectTables>> {
        self.projects.get(project_id).map(|t| t.clone())
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn increment(&self, project_id: &str, counter: Counter) -> Result<u64> {
        let tables = self.tables(project_id);
        Ok(tables.counter(counter).fetch_add(1, Ordering::AcqRel) + 1)
    }

    async fn load(&self, project_id: &str, counter: Counter) -> Result<u64> {
        Ok(self
            .existing(project_id)
            .map(|t| t.counter(counter).load(Ordering::Acquire))
            .unwrap_or(0))
    }

    async fn get_lock(&self, project_id: &str, element_id: &str) -> Result<Option<LockRecord>> {
        Ok(self
            .existing(project_id)
            .and_then(|t| t.locks.get(element_id).map(|l| l.clone())))
    }

    async fn compare_and_swap_lock(
        &self,
        project_id: &str,
        element_id: &str,
        expected: Option<&LockRecord>,
        new: Option<LockRecord>,
    ) -> Result<bool> {
        let tables = self.tables(project_id);
        // The entry guard holds the shard lock, so compare and swap are one step.
        let swapped = match tables.locks.entry(element_id.to_string()) {
            Entry::Occupied(mut occupied) => match expected {
                Some(expected) if occupied.get() == expected => {
                    match new {
                        Some(record) => {
                            occupied.insert(record);
                        }
                        None => {
                            occupied.remove();
                        }
                    }
                    true
                }
                _ => false,
            },
            Entry::Vacant(vacant) => match (expected, new) {
                (None, Some(record)) => {
                    vacant.insert(record);
                    true
                }
                (None, None) => true,
                (Some(_), _) => false,
            },
        };
        Ok(swapped)
    }

    async fn locks(&self, project_id: &str) -> Result<Vec<(String, LockRecord)>> {
        Ok(self
            .existing(project_id)
            .map(|t| {
                t.locks
                    .iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_stroke_if_absent(
        &self,
        project_id: &str,
        stroke_id: &str,
        meta: StrokeMeta,
    ) -> Result<bool> {
        let tables = self.tables(project_id);
        let created = match tables.strokes.entry(stroke_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(StrokeEntry {
                    ordinal: tables.stroke_ordinal.fetch_add(1, Ordering::Relaxed),
                    meta,
                    blocks: Vec::new(),
                });
                true
            }
        };
        Ok(created)
    }

    async fn append_stroke_block(
        &self,
        project_id: &str,
        stroke_id: &str,
        block: Value,
    ) -> Result<bool> {
        let Some(tables) = self.existing(project_id) else {
            return Ok(false);
        };
        let appended = match tables.strokes.get_mut(stroke_id) {
            Some(mut entry) => {
                entry.blocks.push(block);
                true
            }
            None => false,
        };
        Ok(appended)
    }

    async fn remove_stroke(
        &self,
        project_id: &str,
        stroke_id: &str,
    ) -> Result<Option<StrokeRecord>> {
        Ok(self.existing(project_id).and_then(|t| {
            t.strokes
                .remove(stroke_id)
                .map(|(stroke_id, entry)| StrokeRecord {
                    stroke_id,
                    meta: entry.meta,
                    blocks: entry.blocks,
                })
        }))
    }

    async fn strokes(&self, project_id: &str) -> Result<Vec<StrokeRecord>> {
        let Some(tables) = self.existing(project_id) else {
            return Ok(Vec::new());
        };
        let mut strokes: Vec<(u64, StrokeRecord)> = tables
            .strokes
            .iter()
            .map(|e| {
                (
                    e.ordinal,
                    StrokeRecord {
                        stroke_id: e.key().clone(),
                        meta: e.meta.clone(),
                        blocks: e.blocks.clone(),
                    },
                )
            })
            .collect();
        strokes.sort_by_key(|(ordinal, _)| *ordinal);
        Ok(strokes.into_iter().map(|(_, s)| s).collect())
    }

    async fn purge_project(&self, project_id: &str) -> Result<()> {
        self.projects.remove(project_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lock(owner: &str, token: &str, expires_at: i64) -> LockRecord {
        LockRecord {
            owner_id: owner.to_string(),
            token: token.to_string(),
            expires_at,
        }
    }

    fn meta(owner: &str) -> StrokeMeta {
        StrokeMeta {
            owner_id: owner.to_string(),
            page_id: json!("page-1"),
            tool: Some("pen".into()),
            color: None,
            stroke_width: Some(3.0),
        }
    }

    #[tokio::test]
    async fn test_counters_start_at_one_and_are_per_project() {
        let store = MemoryCoordinationStore::new();
        assert_eq!(store.load("p1", Counter::Sequence).await.unwrap(), 0);
        assert_eq!(store.increment("p1", Counter::Sequence).await.unwrap(), 1);
        assert_eq!(store.increment("p1", Counter::Sequence).await.unwrap(), 2);
        assert_eq!(store.increment("p2", Counter::Sequence).await.unwrap(), 1);
        assert_eq!(store.load("p1", Counter::Version).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        let store = Arc::new(MemoryCoordinationStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..250 {
                    seen.push(store.increment("p1", Counter::Sequence).await.unwrap());
                }
                seen
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (1..=2000).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_lock_compare_and_swap() {
        let store = MemoryCoordinationStore::new();
        let a = lock("alice", "t1", 100);
        let b = lock("bob", "t2", 200);

        assert!(store
            .compare_and_swap_lock("p1", "e1", None, Some(a.clone()))
            .await
            .unwrap());
        // Stale expectation loses.
        assert!(!store
            .compare_and_swap_lock("p1", "e1", None, Some(b.clone()))
            .await
            .unwrap());
        assert!(store
            .compare_and_swap_lock("p1", "e1", Some(&a), Some(b.clone()))
            .await
            .unwrap());
        assert_eq!(store.get_lock("p1", "e1").await.unwrap(), Some(b.clone()));
        assert!(store
            .compare_and_swap_lock("p1", "e1", Some(&b), None)
            .await
            .unwrap());
        assert!(store.get_lock("p1", "e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_strokes_append_in_order_and_remove_atomically() {
        let store = MemoryCoordinationStore::new();
        assert!(!store
            .append_stroke_block("p1", "s1", json!({"d": [1]}))
            .await
            .unwrap());

        assert!(store
            .insert_stroke_if_absent("p1", "s1", meta("alice"))
            .await
            .unwrap());
        assert!(!store
            .insert_stroke_if_absent("p1", "s1", meta("bob"))
            .await
            .unwrap());
        store.insert_stroke_if_absent("p1", "s2", meta("bob")).await.unwrap();

        for i in 0..3 {
            store
                .append_stroke_block("p1", "s1", json!({"d": [i]}))
                .await
                .unwrap();
        }

        let strokes = store.strokes("p1").await.unwrap();
        assert_eq!(strokes.len(), 2);
        assert_eq!(strokes[0].stroke_id, "s1");
        assert_eq!(strokes[0].meta.owner_id, "alice");
        assert_eq!(strokes[0].blocks.len(), 3);
        assert_eq!(strokes[0].blocks[2], json!({"d": [2]}));

        let removed = store.remove_stroke("p1", "s1").await.unwrap().unwrap();
        assert_eq!(removed.blocks.len(), 3);
        assert!(store.remove_stroke("p1", "s1").await.unwrap().is_none());
        assert_eq!(store.strokes("p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_project() {
        let store = MemoryCoordinationStore::new();
        store.increment("p1", Counter::Version).await.unwrap();
        assert_eq!(store.project_count(), 1);
        store.purge_project("p1").await.unwrap();
        assert_eq!(store.project_count(), 0);
        assert_eq!(store.load("p1", Counter::Version).await.unwrap(), 0);
    }
}
