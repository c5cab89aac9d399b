//! Sequence & Version Allocator

use std::sync::Arc;

use crate::envelope::ProjectId;
use crate::error::Result;
use crate::store::{CoordinationStore, Counter};

/// Per-project monotonic counters
#[derive(Clone)]
pub struct SequenceAllocator {
    project_id: ProjectId,
    store: Arc<dyn CoordinationStore>,
}

impl SequenceAllocator {
    /// Allocator for one project
    #[must_use]
    pub fn new(project_id: impl Into<ProjectId>, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            project_id: project_id.into(),
            store,
        }
    }

    /// Next sequence number; the first call for a project returns 1
    pub async fn next_sequence(&self) -> Result<u64> {
        self.store
            .increment(&self.project_id, Counter::Sequence)
            .await
    }

    /// Advance the version after a durable mutation
    pub async fn bump_version(&self) -> Result<u64> {
        self.store.increment(&self.project_id, Counter::Version).await
    }

    /// Current version without advancing it
    pub async fn current_version(&self) -> Result<u64> {
        self.store.load(&self.project_id, Counter::Version).await
    }

    /// Last sequence number handed out
    pub async fn current_sequence(&self) -> Result<u64> {
        self.store.load(&self.project_id, Counter::Sequence).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCoordinationStore;

    #[tokio::test]
    async fn test_sequence_and_version_are_independent() {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let alloc = SequenceAllocator::new("p1", store.clone());

        assert_eq!(alloc.next_sequence().await.unwrap(), 1);
        assert_eq!(alloc.next_sequence().await.unwrap(), 2);
        assert_eq!(alloc.current_version().await.unwrap(), 0);
        assert_eq!(alloc.bump_version().await.unwrap(), 1);
        assert_eq!(alloc.current_version().await.unwrap(), 1);
        assert_eq!(alloc.current_sequence().await.unwrap(), 2);

        let other = SequenceAllocator::new("p2", store);
        assert_eq!(other.next_sequence().await.unwrap(), 1);
    }
}
