//! Live actor instance
//!
//! Owns the state container, the lane queue, the running-quest counters and
//! the read-model linkage (parents and feeds) of one actor.

use crate::actor_type::ActorType;
use crate::lanes::LaneQueue;
use horde_core::io::TimeProvider;
use horde_core::{ActorId, State, StateContainer};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Statistics for a live instance
///
/// Uses monotonic timestamps from the runtime's time provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceStats {
    /// When the instance was constructed (monotonic ms)
    pub created_at_ms: u64,
    /// Last quest completion (monotonic ms)
    pub last_activity_at_ms: Option<u64>,
    /// Quests completed
    pub quest_count: u64,
    /// Quests that ended in error
    pub error_count: u64,
    /// Total time spent in quests in ms
    pub total_quest_time_ms: u64,
}

impl InstanceStats {
    fn new(time: &dyn TimeProvider) -> Self {
        Self {
            created_at_ms: time.monotonic_ms(),
            ..Default::default()
        }
    }

    fn record(&mut self, duration_ms: u64, is_error: bool, time: &dyn TimeProvider) {
        self.last_activity_at_ms = Some(time.monotonic_ms());
        self.quest_count = self.quest_count.wrapping_add(1);
        self.total_quest_time_ms = self.total_quest_time_ms.saturating_add(duration_ms);
        if is_error {
            self.error_count = self.error_count.wrapping_add(1);
        }
    }

    /// Time since the last quest, or since construction
    pub fn idle_time_ms(&self, time: &dyn TimeProvider) -> u64 {
        let since = self.last_activity_at_ms.unwrap_or(self.created_at_ms);
        time.monotonic_ms().saturating_sub(since)
    }

    /// Mean quest duration in ms
    pub fn average_quest_time_ms(&self) -> u64 {
        if self.quest_count == 0 {
            0
        } else {
            self.total_quest_time_ms / self.quest_count
        }
    }
}

/// One live actor
pub struct ActorInstance {
    id: ActorId,
    actor_type: Arc<ActorType>,
    generation: AtomicU64,
    state: Arc<AsyncMutex<StateContainer>>,
    lanes: Arc<LaneQueue>,
    running: Mutex<HashMap<String, usize>>,
    parents: Mutex<BTreeSet<ActorId>>,
    feeds: Mutex<BTreeSet<String>>,
    stats: Mutex<InstanceStats>,
    deleting: AtomicBool,
    ranked: AtomicBool,
}

impl std::fmt::Debug for ActorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorInstance")
            .field("id", &self.id)
            .field("generation", &self.generation())
            .field("lanes", &self.lanes)
            .finish()
    }
}

impl ActorInstance {
    /// Build an instance and start its lane pump
    ///
    /// Lanes start paused unless the type is a singleton.
    pub(crate) fn new(
        id: ActorId,
        actor_type: Arc<ActorType>,
        generation: u64,
        lane_capacity: usize,
        time: &dyn TimeProvider,
    ) -> Arc<Self> {
        debug_assert!(generation > 0, "generations start at 1");

        let container = StateContainer::new(
            actor_type.initial_state().clone(),
            Arc::clone(actor_type.logic()),
        );
        let lanes = LaneQueue::start(id.clone(), lane_capacity, !actor_type.is_singleton());

        Arc::new(Self {
            id,
            actor_type,
            generation: AtomicU64::new(generation),
            state: Arc::new(AsyncMutex::new(container)),
            lanes,
            running: Mutex::new(HashMap::new()),
            parents: Mutex::new(BTreeSet::new()),
            feeds: Mutex::new(BTreeSet::new()),
            stats: Mutex::new(InstanceStats::new(time)),
            deleting: AtomicBool::new(false),
            ranked: AtomicBool::new(false),
        })
    }

    /// Actor id
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// Actor type
    pub fn actor_type(&self) -> &Arc<ActorType> {
        &self.actor_type
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn set_generation(&self, generation: u64) {
        let previous = self.generation.swap(generation, Ordering::SeqCst);
        debug_assert!(generation > previous, "generation must increase");
    }

    /// Shared state container
    pub fn state(&self) -> &Arc<AsyncMutex<StateContainer>> {
        &self.state
    }

    /// Current snapshot
    pub async fn snapshot(&self) -> State {
        self.state.lock().await.state().clone()
    }

    /// Lane queue
    pub fn lanes(&self) -> &Arc<LaneQueue> {
        &self.lanes
    }

    /// Per-quest count of running quests
    pub fn running_quests(&self) -> HashMap<String, usize> {
        lock(&self.running).clone()
    }

    /// Total running quests
    pub fn running_total(&self) -> usize {
        lock(&self.running).values().sum()
    }

    pub(crate) fn quest_started(self: &Arc<Self>, quest: &str) -> RunningGuard {
        *lock(&self.running).entry(quest.to_string()).or_insert(0) += 1;
        RunningGuard {
            instance: Arc::clone(self),
            quest: quest.to_string(),
        }
    }

    fn quest_ended(&self, quest: &str) {
        let mut running = lock(&self.running);
        if let Some(count) = running.get_mut(quest) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                running.remove(quest);
            }
        }
    }

    pub(crate) fn link(&self, parent: Option<&ActorId>, feed: &str) {
        if let Some(parent) = parent {
            lock(&self.parents).insert(parent.clone());
        }
        lock(&self.feeds).insert(feed.to_string());
    }

    /// Owning parents
    pub fn parents(&self) -> Vec<ActorId> {
        lock(&self.parents).iter().cloned().collect()
    }

    /// Feeds the branch lives in
    pub fn feeds(&self) -> Vec<String> {
        lock(&self.feeds).iter().cloned().collect()
    }

    /// Whether a delete is draining this instance
    pub fn is_deleting(&self) -> bool {
        self.deleting.load(Ordering::SeqCst)
    }

    pub(crate) fn set_deleting(&self, deleting: bool) {
        self.deleting.store(deleting, Ordering::SeqCst);
    }

    /// Returns true the first time it is called
    pub(crate) fn mark_ranked(&self) -> bool {
        !self.ranked.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn record_quest(&self, duration_ms: u64, is_error: bool, time: &dyn TimeProvider) {
        lock(&self.stats).record(duration_ms, is_error, time);
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> InstanceStats {
        lock(&self.stats).clone()
    }
}

/// Decrements the running-quest counter on drop
pub(crate) struct RunningGuard {
    instance: Arc<ActorInstance>,
    quest: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.instance.quest_ended(&self.quest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor_type::QuestOutcome;
    use horde_core::ManualClock;
    use serde_json::json;

    fn counter_type() -> Arc<ActorType> {
        Arc::new(
            ActorType::builder("counter")
                .initial_state(json!({"count": 0}))
                .quest("create", |_ctx, _payload| async { Ok(QuestOutcome::empty()) })
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_instance_starts_paused_with_initial_state() {
        let clock = ManualClock::new(100);
        let instance = ActorInstance::new(
            ActorId::parse("counter@1").unwrap(),
            counter_type(),
            1,
            16,
            &clock,
        );

        assert!(instance.lanes().is_paused());
        assert_eq!(instance.generation(), 1);
        assert_eq!(instance.snapshot().await.get("count"), Some(&json!(0)));
        assert_eq!(instance.stats().created_at_ms, 100);
    }

    #[tokio::test]
    async fn test_running_quest_guard() {
        let clock = ManualClock::new(0);
        let instance = ActorInstance::new(
            ActorId::parse("counter@1").unwrap(),
            counter_type(),
            1,
            16,
            &clock,
        );

        let a = instance.quest_started("increment");
        let b = instance.quest_started("increment");
        assert_eq!(instance.running_quests().get("increment"), Some(&2));
        drop(a);
        assert_eq!(instance.running_total(), 1);
        drop(b);
        assert!(instance.running_quests().is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_linkage() {
        let clock = ManualClock::new(0);
        let instance = ActorInstance::new(
            ActorId::parse("counter@1").unwrap(),
            counter_type(),
            1,
            16,
            &clock,
        );

        clock.advance_ms(10);
        instance.record_quest(4, false, &clock);
        instance.record_quest(6, true, &clock);
        let stats = instance.stats();
        assert_eq!(stats.quest_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.average_quest_time_ms(), 5);
        clock.advance_ms(5);
        assert_eq!(stats.idle_time_ms(&clock), 5);

        let parent = ActorId::parse("desktop@main").unwrap();
        instance.link(Some(&parent), "system");
        instance.link(Some(&parent), "system");
        assert_eq!(instance.parents(), vec![parent]);
        assert_eq!(instance.feeds(), vec!["system".to_string()]);

        assert!(instance.mark_ranked());
        assert!(!instance.mark_ranked());
    }
}
