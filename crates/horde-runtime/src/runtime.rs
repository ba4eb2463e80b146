//! Runtime entry point
//!
//! Owns the type table, the registry and the collaborators, and routes every
//! invocation: validation and the capability check first, then the lifecycle
//! controller for `create`/`delete` and the lane queues for everything else.

use crate::actor_type::{ActorType, QuestOutcome};
use crate::handle::ActorHandle;
use crate::instance::{ActorInstance, InstanceStats};
use crate::invocation::Invocation;
use crate::lifecycle;
use crate::registry::{ActorRegistry, Lifecycle};
use horde_core::{ActorId, Error, IoContext, Result, RuntimeConfig};
use horde_warehouse::{
    AllowAll, CapabilityGuard, EventSink, EvictionRanker, LruEvictionRanker, MemoryEventSink,
    MemoryWarehouse, Warehouse,
};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, instrument, warn};

/// Builder for [`Runtime`]
///
/// Every collaborator defaults to its in-memory implementation.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    io: IoContext,
    warehouse: Option<Arc<dyn Warehouse>>,
    events: Option<Arc<dyn EventSink>>,
    guard: Option<Arc<dyn CapabilityGuard>>,
    ranker: Option<Arc<dyn EvictionRanker>>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            io: IoContext::production(),
            warehouse: None,
            events: None,
            guard: None,
            ranker: None,
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the time and randomness providers
    pub fn with_io(mut self, io: IoContext) -> Self {
        self.io = io;
        self
    }

    /// Set the read-model store
    pub fn with_warehouse(mut self, warehouse: Arc<dyn Warehouse>) -> Self {
        self.warehouse = Some(warehouse);
        self
    }

    /// Set the event sink
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the capability guard
    pub fn with_guard(mut self, guard: Arc<dyn CapabilityGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Set the eviction ranker
    pub fn with_ranker(mut self, ranker: Arc<dyn EvictionRanker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    /// Build the runtime
    ///
    /// # Errors
    /// `InvalidConfiguration` when the configuration is out of bounds.
    pub fn build(self) -> Result<Runtime> {
        self.config.validate()?;

        let inner = RuntimeInner {
            types: RwLock::new(HashMap::new()),
            registry: ActorRegistry::new(),
            warehouse: self
                .warehouse
                .unwrap_or_else(|| Arc::new(MemoryWarehouse::new())),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(MemoryEventSink::new())),
            guard: self.guard.unwrap_or_else(|| Arc::new(AllowAll)),
            ranker: self
                .ranker
                .unwrap_or_else(|| Arc::new(LruEvictionRanker::new())),
            io: self.io,
            config: self.config,
            shutting_down: AtomicBool::new(false),
        };

        info!(
            max_actors = inner.config.max_actors,
            max_pending_per_actor = inner.config.max_pending_per_actor,
            "Horde runtime built"
        );

        Ok(Runtime {
            inner: Arc::new(inner),
        })
    }
}

struct RuntimeInner {
    types: RwLock<HashMap<String, Arc<ActorType>>>,
    registry: ActorRegistry,
    warehouse: Arc<dyn Warehouse>,
    events: Arc<dyn EventSink>,
    guard: Arc<dyn CapabilityGuard>,
    ranker: Arc<dyn EvictionRanker>,
    io: IoContext,
    config: RuntimeConfig,
    shutting_down: AtomicBool,
}

/// The Horde runtime
///
/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl Runtime {
    /// Start building a runtime
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an actor type
    ///
    /// # Errors
    /// `ActorTypeAlreadyRegistered` when the kind is taken.
    pub fn register(&self, actor_type: ActorType) -> Result<()> {
        let mut types = self
            .inner
            .types
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let kind = actor_type.kind().to_string();
        if types.contains_key(&kind) {
            return Err(Error::ActorTypeAlreadyRegistered { kind });
        }

        info!(kind = %kind, singleton = actor_type.is_singleton(), "Actor type registered");
        types.insert(kind, Arc::new(actor_type));
        Ok(())
    }

    fn actor_type(&self, kind: &str) -> Result<Arc<ActorType>> {
        self.inner
            .types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnknownActorType {
                kind: kind.to_string(),
            })
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Invoke a quest
    ///
    /// Misuse (unknown type, malformed id, unknown quest, missing generation
    /// or parent, blocked caller) fails before anything is scheduled. Quest
    /// failures come back as `Error::Quest`.
    #[instrument(skip_all, fields(actor_id = %id, quest = %invocation.quest))]
    pub async fn invoke(&self, id: &ActorId, mut invocation: Invocation) -> Result<QuestOutcome> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let actor_type = self.actor_type(id.kind())?;
        actor_type.validate_id(id)?;

        if invocation.is_delete() && invocation.generation.is_none() {
            protocol_violation(id, &actor_type, &invocation, "delete without generation");
            return Err(Error::MissingGeneration {
                id: id.to_string(),
                quest: invocation.quest,
            });
        }

        if !actor_type.has_quest(&invocation.quest) {
            return Err(Error::UnknownQuest {
                id: id.to_string(),
                quest: invocation.quest,
            });
        }

        let is_creation = actor_type.is_creation_quest(&invocation.quest);
        if is_creation && !actor_type.is_singleton() && invocation.parent.is_none() {
            protocol_violation(id, &actor_type, &invocation, "create without parent");
            return Err(Error::MissingParent { id: id.to_string() });
        }

        let command = format!("{}.{}", actor_type.kind(), invocation.quest);
        let caller = invocation.caller.as_ref().map(|c| &c.id);
        if self.inner.guard.is_blocked(caller, &command).await {
            let caller = caller.map_or_else(|| "<external>".to_string(), ToString::to_string);
            warn!(actor_id = %id, caller = %caller, command = %command, "Invocation blocked");
            return Err(Error::Blocked { caller, command });
        }

        let msg_id = match &invocation.msg_id {
            Some(msg_id) => msg_id.clone(),
            None => {
                let msg_id = self.inner.io.gen_uuid();
                invocation.msg_id = Some(msg_id.clone());
                msg_id
            }
        };

        if invocation.is_delete() {
            return lifecycle::delete(self, id, invocation, msg_id).await;
        }

        if is_creation {
            return lifecycle::create(self, actor_type, id, invocation, msg_id, false).await;
        }

        let (instance, creating) = lifecycle::resolve(self, &actor_type, id).await?;
        lifecycle::enqueue(self, instance, invocation, msg_id, creating).await
    }

    /// Invoke `quest` from outside any actor
    pub async fn cmd(
        &self,
        id: &ActorId,
        quest: impl Into<String>,
        payload: Value,
    ) -> Result<QuestOutcome> {
        self.invoke(id, Invocation::new(quest, payload)).await
    }

    /// Create `id` under `parent`
    pub async fn create(&self, id: &ActorId, parent: ActorId, payload: Value) -> Result<QuestOutcome> {
        self.invoke(id, Invocation::create(parent, payload)).await
    }

    /// Delete `id` at `generation`
    pub async fn delete(&self, id: &ActorId, generation: u64) -> Result<QuestOutcome> {
        self.invoke(id, Invocation::delete(generation)).await
    }

    /// Detach `id` from its parents and delete it at its current generation
    ///
    /// Evicting an absent actor is a no-op.
    #[instrument(skip_all, fields(actor_id = %id))]
    pub async fn evict(&self, id: &ActorId) -> Result<()> {
        let Some(instance) = self.instance(id).await else {
            return Ok(());
        };

        self.inner
            .warehouse
            .detach_from_parents(id, &instance.parents())
            .await?;

        let generation = instance.generation();
        let msg_id = self.inner.io.gen_uuid();
        debug!(actor_id = %id, generation, "Evicting actor");
        lifecycle::delete(self, id, Invocation::delete(generation), msg_id).await?;
        Ok(())
    }

    /// Delete every live actor and refuse new invocations
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let ids = self.inner.registry.ids();
        info!(actors = ids.len(), "Horde runtime shutting down");

        for id in ids {
            let Some(generation) = self.generation(&id).await else {
                continue;
            };
            let msg_id = self.inner.io.gen_uuid();
            if let Err(e) = lifecycle::delete(self, &id, Invocation::delete(generation), msg_id).await {
                warn!(actor_id = %id, error = %e, "Delete during shutdown failed");
            }
        }

        info!("Horde runtime stopped");
        Ok(())
    }

    /// Whether `shutdown` was called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Handle bound to the current generation of a live actor
    pub async fn handle(&self, id: &ActorId) -> Result<ActorHandle> {
        let generation = self
            .generation(id)
            .await
            .ok_or_else(|| Error::actor_not_found(id.to_string()))?;
        Ok(ActorHandle::new(id.clone(), generation, self.clone()))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    async fn instance(&self, id: &ActorId) -> Option<Arc<ActorInstance>> {
        let slot = self.inner.registry.get(id)?;
        let state = slot.lock().await;
        state.instance.clone()
    }

    /// Current generation, `None` when absent
    pub async fn generation(&self, id: &ActorId) -> Option<u64> {
        let slot = self.inner.registry.get(id)?;
        let state = slot.lock().await;
        state.instance.as_ref().map(|_| state.generation)
    }

    /// Lifecycle of `id`
    pub async fn lifecycle(&self, id: &ActorId) -> Lifecycle {
        match self.inner.registry.get(id) {
            Some(slot) => slot.lock().await.lifecycle,
            None => Lifecycle::Absent,
        }
    }

    /// Whether `id` is created and not being deleted
    pub async fn is_alive(&self, id: &ActorId) -> bool {
        self.lifecycle(id).await == Lifecycle::Created
    }

    /// Per-quest counts of running quests
    pub async fn running_quests(&self, id: &ActorId) -> Option<HashMap<String, usize>> {
        self.instance(id).await.map(|i| i.running_quests())
    }

    /// Statistics of a live instance
    pub async fn instance_stats(&self, id: &ActorId) -> Option<InstanceStats> {
        self.instance(id).await.map(|i| i.stats())
    }

    /// Ids known to the registry
    pub fn actor_count(&self) -> usize {
        self.inner.registry.len()
    }

    // =========================================================================
    // Collaborators
    // =========================================================================

    /// Time and randomness providers
    pub fn io(&self) -> &IoContext {
        &self.inner.io
    }

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn registry(&self) -> &ActorRegistry {
        &self.inner.registry
    }

    pub(crate) fn warehouse(&self) -> &Arc<dyn Warehouse> {
        &self.inner.warehouse
    }

    pub(crate) fn events(&self) -> &Arc<dyn EventSink> {
        &self.inner.events
    }

    pub(crate) fn ranker(&self) -> &Arc<dyn EvictionRanker> {
        &self.inner.ranker
    }
}

fn protocol_violation(id: &ActorId, actor_type: &ActorType, invocation: &Invocation, reason: &str) {
    error!(
        actor_id = %id,
        kind = %actor_type.kind(),
        quest = %invocation.quest,
        caller = ?invocation.caller.as_ref().map(|c| format!("{}.{}", c.id, c.quest)),
        reason,
        "Protocol violation"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter() -> ActorType {
        ActorType::builder("counter")
            .initial_state(json!({"count": 0}))
            .reducer("set", |state, action| state.set("count", action.payload.clone()))
            .quest("create", |ctx, payload| async move {
                ctx.dispatch("set", payload).await?;
                Ok(QuestOutcome::empty())
            })
            .build()
            .unwrap()
    }

    fn id(raw: &str) -> ActorId {
        ActorId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_kind() {
        let runtime = Runtime::builder().build().unwrap();
        runtime.register(counter()).unwrap();
        assert!(matches!(
            runtime.register(counter()),
            Err(Error::ActorTypeAlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_validates_config() {
        let config = RuntimeConfig {
            max_actors: 0,
            ..Default::default()
        };
        assert!(matches!(
            Runtime::builder().with_config(config).build(),
            Err(Error::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_misuse_fails_before_scheduling() {
        let runtime = Runtime::builder().build().unwrap();
        runtime.register(counter()).unwrap();

        let err = runtime.cmd(&id("ghost@1"), "poke", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::UnknownActorType { .. }));

        let err = runtime.cmd(&id("counter@1"), "poke", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::UnknownQuest { .. }));

        let err = runtime
            .invoke(&id("counter@1"), Invocation::new("create", json!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingParent { .. }));

        let err = runtime
            .invoke(&id("counter@1"), Invocation::new("delete", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingGeneration { .. }));

        assert_eq!(runtime.actor_count(), 0);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_missing_fields_are_logged_as_errors() {
        let logs = CapturedLogs::default();
        let subscriber = {
            let logs = logs.clone();
            tracing_subscriber::fmt()
                .with_ansi(false)
                .with_max_level(tracing::Level::ERROR)
                .with_writer(move || logs.clone())
                .finish()
        };
        let _default = tracing::subscriber::set_default(subscriber);

        let runtime = Runtime::builder().build().unwrap();
        runtime.register(counter()).unwrap();

        let _ = runtime
            .invoke(&id("counter@1"), Invocation::new("delete", Value::Null))
            .await;
        let _ = runtime
            .invoke(&id("counter@2"), Invocation::new("create", json!(1)))
            .await;

        let text = logs.text();
        assert!(text.contains("ERROR"));
        assert_eq!(text.matches("Protocol violation").count(), 2);
        assert!(text.contains("delete without generation"));
        assert!(text.contains("create without parent"));
        assert!(text.contains("kind=counter"));
        assert!(text.contains("actor_id=counter@2"));
    }

    #[tokio::test]
    async fn test_create_then_query() {
        let runtime = Runtime::builder().build().unwrap();
        runtime.register(counter()).unwrap();
        let target = id("counter@1");

        runtime
            .create(&target, id("desktop@main"), json!(7))
            .await
            .unwrap();

        assert!(runtime.is_alive(&target).await);
        assert_eq!(runtime.generation(&target).await, Some(1));
        assert_eq!(runtime.lifecycle(&target).await, Lifecycle::Created);
        assert_eq!(runtime.instance_stats(&target).await.unwrap().quest_count, 1);
        assert_eq!(runtime.actor_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_deletes_and_refuses() {
        let runtime = Runtime::builder().build().unwrap();
        runtime.register(counter()).unwrap();
        let target = id("counter@1");
        runtime
            .create(&target, id("desktop@main"), json!(1))
            .await
            .unwrap();

        runtime.shutdown().await.unwrap();
        assert_eq!(runtime.lifecycle(&target).await, Lifecycle::Absent);
        assert!(matches!(
            runtime.cmd(&target, "create", Value::Null).await,
            Err(Error::ShuttingDown)
        ));
    }
}
