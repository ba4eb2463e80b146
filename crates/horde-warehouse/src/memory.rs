//! In-memory warehouse
//!
//! Keeps every branch in a map behind a `tokio::sync::RwLock`. Feeds can be
//! marked as vanished to exercise the attach failure path.

use crate::warehouse::{AttachOutcome, Warehouse};
use async_trait::async_trait;
use horde_core::{ActorId, Result, State};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

/// One stored branch
#[derive(Debug, Clone, Default)]
pub struct Branch {
    /// Generation the branch was last attached with
    pub generation: u64,
    /// Owning parents
    pub parents: BTreeSet<String>,
    /// Feeds the branch lives in
    pub feeds: BTreeSet<String>,
    /// Last published state, `None` until the first upsert
    pub data: Option<Value>,
    /// Number of upserts received
    pub upserts: u64,
}

#[derive(Debug, Default)]
struct WarehouseData {
    branches: HashMap<String, Branch>,
    vanished_feeds: HashSet<String>,
}

/// In-memory read-model store
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    data: Arc<RwLock<WarehouseData>>,
}

impl MemoryWarehouse {
    /// Create an empty warehouse
    pub fn new() -> Self {
        Self::default()
    }

    /// Make later attaches into `feed` fail
    pub async fn vanish_feed(&self, feed: impl Into<String>) {
        self.data.write().await.vanished_feeds.insert(feed.into());
    }

    /// Whether the branch exists, attached or published
    pub async fn contains(&self, branch: &ActorId) -> bool {
        self.data.read().await.branches.contains_key(branch.as_str())
    }

    /// Whether the branch has published state
    pub async fn is_visible(&self, branch: &ActorId) -> bool {
        self.get(branch).await.is_some()
    }

    /// Last published state of a branch
    pub async fn get(&self, branch: &ActorId) -> Option<Value> {
        self.data
            .read()
            .await
            .branches
            .get(branch.as_str())
            .and_then(|b| b.data.clone())
    }

    /// Full branch record
    pub async fn branch(&self, branch: &ActorId) -> Option<Branch> {
        self.data.read().await.branches.get(branch.as_str()).cloned()
    }

    /// Number of stored branches
    pub async fn len(&self) -> usize {
        self.data.read().await.branches.len()
    }

    /// Whether no branch is stored
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    #[instrument(skip_all, fields(branch = %branch, generation = generation, feed = %feed), level = "debug")]
    async fn attach_to_parents(
        &self,
        branch: &ActorId,
        generation: u64,
        parents: &[ActorId],
        feed: &str,
    ) -> Result<AttachOutcome> {
        let mut data = self.data.write().await;
        if data.vanished_feeds.contains(feed) {
            return Ok(AttachOutcome::vanished());
        }

        let entry = data.branches.entry(branch.to_string()).or_default();
        entry.generation = generation;
        entry.feeds.insert(feed.to_string());
        entry
            .parents
            .extend(parents.iter().map(|p| p.to_string()));

        Ok(AttachOutcome::attached())
    }

    #[instrument(skip_all, fields(branch = %branch), level = "debug")]
    async fn detach_from_parents(&self, branch: &ActorId, parents: &[ActorId]) -> Result<()> {
        let mut data = self.data.write().await;
        if let Some(entry) = data.branches.get_mut(branch.as_str()) {
            for parent in parents {
                entry.parents.remove(parent.as_str());
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %branch), level = "debug")]
    async fn upsert(
        &self,
        branch: &ActorId,
        state: &State,
        feeds: &[String],
        parents: &[ActorId],
    ) -> Result<()> {
        let mut data = self.data.write().await;
        let entry = data.branches.entry(branch.to_string()).or_default();
        entry.data = Some(state.to_value());
        entry.upserts += 1;
        entry.feeds.extend(feeds.iter().cloned());
        entry
            .parents
            .extend(parents.iter().map(|p| p.to_string()));
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %branch), level = "debug")]
    async fn delete_branch(&self, branch: &ActorId) -> Result<()> {
        self.data.write().await.branches.remove(branch.as_str());
        Ok(())
    }
}
