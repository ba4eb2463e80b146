//! Eviction ranking
//!
//! Actor types with a bounded cache register each instance once it has
//! published state. The ranker answers with the ids that fell out of the
//! cache; the runtime deletes those.

use async_trait::async_trait;
use horde_core::{ActorId, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cache ranking collaborator
#[async_trait]
pub trait EvictionRanker: Send + Sync {
    /// Register `id` in the cache of `kind` bounded at `size`
    ///
    /// Returns the ids that must be evicted as a consequence.
    async fn rank(&self, kind: &str, id: &ActorId, size: usize) -> Result<Vec<ActorId>>;

    /// Mark `id` as recently used
    async fn touch(&self, _kind: &str, _id: &ActorId) {}

    /// Drop `id` from the cache (after deletion)
    async fn forget(&self, _kind: &str, _id: &ActorId) {}
}

/// Ranker that never evicts
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEviction;

#[async_trait]
impl EvictionRanker for NoEviction {
    async fn rank(&self, _kind: &str, _id: &ActorId, _size: usize) -> Result<Vec<ActorId>> {
        Ok(Vec::new())
    }
}

/// Least-recently-used ranking, one queue per kind
#[derive(Debug, Clone, Default)]
pub struct LruEvictionRanker {
    /// kind -> ids, least recently used first
    caches: Arc<Mutex<HashMap<String, VecDeque<ActorId>>>>,
}

impl LruEvictionRanker {
    /// Create an empty ranker
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids currently cached for `kind`, least recently used first
    pub async fn cached(&self, kind: &str) -> Vec<ActorId> {
        self.caches
            .lock()
            .await
            .get(kind)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EvictionRanker for LruEvictionRanker {
    async fn rank(&self, kind: &str, id: &ActorId, size: usize) -> Result<Vec<ActorId>> {
        debug_assert!(size > 0);

        let mut caches = self.caches.lock().await;
        let queue = caches.entry(kind.to_string()).or_default();
        queue.retain(|cached| cached != id);
        queue.push_back(id.clone());

        let mut evicted = Vec::new();
        while queue.len() > size {
            if let Some(oldest) = queue.pop_front() {
                evicted.push(oldest);
            }
        }

        debug_assert!(queue.len() <= size);
        Ok(evicted)
    }

    async fn touch(&self, kind: &str, id: &ActorId) {
        let mut caches = self.caches.lock().await;
        if let Some(queue) = caches.get_mut(kind) {
            if let Some(pos) = queue.iter().position(|cached| cached == id) {
                if let Some(entry) = queue.remove(pos) {
                    queue.push_back(entry);
                }
            }
        }
    }

    async fn forget(&self, kind: &str, id: &ActorId) {
        let mut caches = self.caches.lock().await;
        if let Some(queue) = caches.get_mut(kind) {
            queue.retain(|cached| cached != id);
        }
    }
}
