//! Capability guard
//!
//! Consulted before admission. Commands are named `<kind>.<quest>`.

use async_trait::async_trait;
use horde_core::ActorId;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Security hook deciding whether a caller may issue a command
#[async_trait]
pub trait CapabilityGuard: Send + Sync {
    /// True when `caller` must not run `command`
    ///
    /// `caller` is `None` for top-level invocations.
    async fn is_blocked(&self, caller: Option<&ActorId>, command: &str) -> bool;
}

/// Guard that never blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl CapabilityGuard for AllowAll {
    async fn is_blocked(&self, _caller: Option<&ActorId>, _command: &str) -> bool {
        false
    }
}

/// Guard blocking a fixed set of commands for every caller
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    commands: Arc<RwLock<HashSet<String>>>,
}

impl DenyList {
    /// Create an empty deny list
    pub fn new() -> Self {
        Self::default()
    }

    /// Block a command
    pub async fn deny(&self, command: impl Into<String>) {
        self.commands.write().await.insert(command.into());
    }

    /// Unblock a command
    pub async fn allow(&self, command: &str) {
        self.commands.write().await.remove(command);
    }
}

#[async_trait]
impl CapabilityGuard for DenyList {
    async fn is_blocked(&self, _caller: Option<&ActorId>, command: &str) -> bool {
        self.commands.read().await.contains(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all() {
        assert!(!AllowAll.is_blocked(None, "counter.create").await);
    }

    #[tokio::test]
    async fn test_deny_list() {
        let guard = DenyList::new();
        let caller = ActorId::parse("desktop@main").unwrap();
        guard.deny("counter.reset").await;

        assert!(guard.is_blocked(Some(&caller), "counter.reset").await);
        assert!(!guard.is_blocked(Some(&caller), "counter.increment").await);

        guard.allow("counter.reset").await;
        assert!(!guard.is_blocked(None, "counter.reset").await);
    }
}
