//! Actor registry
//!
//! One slot per actor id, each behind its own async lock. The map itself is
//! only touched briefly to look slots up, insert them, or retire them; all
//! lifecycle decisions happen while holding the slot lock.
//!
//! A retired slot has been removed from the map. Anyone who raced the removal
//! and still holds it sees `retired` once they get the lock and looks the id
//! up again.

use crate::actor_type::QuestOutcome;
use crate::instance::ActorInstance;
use horde_core::{ActorId, Result};
use std::collections::HashMap;
use std::fmt;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Notify};

/// Lifecycle of an actor id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// No instance
    #[default]
    Absent,
    /// First creation in flight
    Creating,
    /// Live
    Created,
    /// Draining before removal
    Deleting,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Absent => write!(f, "absent"),
            Lifecycle::Creating => write!(f, "creating"),
            Lifecycle::Created => write!(f, "created"),
            Lifecycle::Deleting => write!(f, "deleting"),
        }
    }
}

/// A caller waiting on the in-flight creation
pub(crate) struct PendingCreate {
    pub msg_id: String,
    pub reply: oneshot::Sender<Result<QuestOutcome>>,
}

/// Lifecycle state guarded by the slot lock
#[derive(Default)]
pub(crate) struct SlotState {
    pub lifecycle: Lifecycle,
    pub instance: Option<Arc<ActorInstance>>,
    pub generation: u64,
    pub pending_creates: Vec<PendingCreate>,
    pub retired: bool,
}

/// Registry entry for one id
#[derive(Default)]
pub(crate) struct Slot {
    state: AsyncMutex<SlotState>,
    changed: Notify,
}

impl Slot {
    pub async fn lock(&self) -> AsyncMutexGuard<'_, SlotState> {
        self.state.lock().await
    }

    /// Wake everyone waiting for a lifecycle change
    pub fn notify_changed(&self) {
        self.changed.notify_waiters();
    }

    /// Release the lock and wait for the next lifecycle change
    pub async fn wait_changed(&self, guard: AsyncMutexGuard<'_, SlotState>) {
        let mut changed = pin!(self.changed.notified());
        changed.as_mut().enable();
        drop(guard);
        changed.await;
    }
}

/// Live actor ids and their lifecycle slots
pub struct ActorRegistry {
    slots: Mutex<HashMap<ActorId, Arc<Slot>>>,
    next_generation: AtomicU64,
}

impl Default for ActorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRegistry")
            .field("slots", &self.len())
            .field("next_generation", &self.next_generation.load(Ordering::SeqCst))
            .finish()
    }
}

impl ActorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<ActorId, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a generation, strictly greater than every previous one
    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    /// Slot for `id`, inserted if missing
    pub(crate) fn slot(&self, id: &ActorId) -> Arc<Slot> {
        Arc::clone(self.map().entry(id.clone()).or_default())
    }

    /// Slot for `id` if one exists
    pub(crate) fn get(&self, id: &ActorId) -> Option<Arc<Slot>> {
        self.map().get(id).cloned()
    }

    /// Remove `slot` from the map if it is still the one registered for `id`
    pub(crate) fn retire(&self, id: &ActorId, slot: &Arc<Slot>) {
        let mut map = self.map();
        if map.get(id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            map.remove(id);
        }
    }

    /// Ids with a slot
    pub fn ids(&self) -> Vec<ActorId> {
        self.map().keys().cloned().collect()
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(raw: &str) -> ActorId {
        ActorId::parse(raw).unwrap()
    }

    #[test]
    fn test_generations_strictly_increase() {
        let registry = ActorRegistry::new();
        let a = registry.next_generation();
        let b = registry.next_generation();
        assert_eq!(a, 1);
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_slot_is_shared_per_id() {
        let registry = ActorRegistry::new();
        let first = registry.slot(&id("counter@1"));
        let second = registry.slot(&id("counter@1"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&id("counter@2")).is_none());
    }

    #[tokio::test]
    async fn test_retire_only_removes_current_slot() {
        let registry = ActorRegistry::new();
        let old = registry.slot(&id("counter@1"));
        registry.retire(&id("counter@1"), &old);
        assert!(registry.is_empty());

        let fresh = registry.slot(&id("counter@1"));
        registry.retire(&id("counter@1"), &old);
        assert!(Arc::ptr_eq(&registry.get(&id("counter@1")).unwrap(), &fresh));
    }

    #[tokio::test]
    async fn test_wait_changed_wakes_on_notify() {
        let registry = ActorRegistry::new();
        let slot = registry.slot(&id("counter@1"));

        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                let guard = slot.lock().await;
                slot.wait_changed(guard).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        {
            let mut state = slot.lock().await;
            state.lifecycle = Lifecycle::Created;
        }
        slot.notify_changed();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
