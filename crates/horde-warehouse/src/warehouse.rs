//! Read-model warehouse trait
//!
//! A branch is the published projection of one actor. It becomes visible on
//! the first upsert and is linked to the parents that own it.

use async_trait::async_trait;
use horde_core::{ActorId, Result, State};
use serde::{Deserialize, Serialize};

/// Result of attaching a branch to its parents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachOutcome {
    /// False when the parent feed no longer exists
    pub success: bool,
}

impl AttachOutcome {
    /// Attached
    pub fn attached() -> Self {
        Self { success: true }
    }

    /// Feed vanished
    pub fn vanished() -> Self {
        Self { success: false }
    }
}

/// Read-model store
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Register a not-yet-visible branch under its parents in `feed`
    async fn attach_to_parents(
        &self,
        branch: &ActorId,
        generation: u64,
        parents: &[ActorId],
        feed: &str,
    ) -> Result<AttachOutcome>;

    /// Unlink a branch from its parents; idempotent
    async fn detach_from_parents(&self, branch: &ActorId, parents: &[ActorId]) -> Result<()>;

    /// Publish the visible state of a branch
    async fn upsert(
        &self,
        branch: &ActorId,
        data: &State,
        feeds: &[String],
        parents: &[ActorId],
    ) -> Result<()>;

    /// Remove a branch entirely
    async fn delete_branch(&self, branch: &ActorId) -> Result<()>;
}
