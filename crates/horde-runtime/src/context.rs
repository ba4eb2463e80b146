//! Quest context
//!
//! The only handle a quest body gets on its actor: state access through
//! reducers, deferred cleanups, and nested invocations that carry the caller
//! chain.

use crate::actor_type::QuestOutcome;
use crate::instance::ActorInstance;
use crate::invocation::{CallerInfo, Invocation};
use crate::runtime::Runtime;
use futures::future::BoxFuture;
use futures::FutureExt;
use horde_core::{Action, ActorId, IoContext, Result, State, FEED_DEFAULT};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Cleanup registered with [`QuestContext::defer`]
pub(crate) type DeferredAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct ContextInner {
    runtime: Runtime,
    instance: Arc<ActorInstance>,
    quest: String,
    msg_id: String,
    caller: Option<CallerInfo>,
    in_create: bool,
    feed: String,
    dispatched: AtomicBool,
    deferred: Mutex<Vec<DeferredAction>>,
}

/// Context handed to every quest body
///
/// Cheap to clone; clones share the deferred list and dispatch flag of the
/// quest run they belong to.
#[derive(Clone)]
pub struct QuestContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for QuestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuestContext")
            .field("id", self.id())
            .field("quest", &self.inner.quest)
            .field("msg_id", &self.inner.msg_id)
            .field("in_create", &self.inner.in_create)
            .finish()
    }
}

impl QuestContext {
    pub(crate) fn new(
        runtime: Runtime,
        instance: Arc<ActorInstance>,
        invocation: &Invocation,
        msg_id: &str,
    ) -> Self {
        let in_create = invocation.is_in_create
            || instance.actor_type().is_creation_quest(&invocation.quest);
        let feed = invocation
            .feed
            .clone()
            .or_else(|| instance.feeds().into_iter().next())
            .unwrap_or_else(|| FEED_DEFAULT.to_string());

        Self {
            inner: Arc::new(ContextInner {
                runtime,
                instance,
                quest: invocation.quest.clone(),
                msg_id: msg_id.to_string(),
                caller: invocation.caller.clone(),
                in_create,
                feed,
                dispatched: AtomicBool::new(false),
                deferred: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Actor id
    pub fn id(&self) -> &ActorId {
        self.inner.instance.id()
    }

    /// Actor kind
    pub fn kind(&self) -> &str {
        self.inner.instance.actor_type().kind()
    }

    /// Running quest
    pub fn quest(&self) -> &str {
        &self.inner.quest
    }

    /// Message id of this run
    pub fn msg_id(&self) -> &str {
        &self.inner.msg_id
    }

    /// Current generation of the actor
    pub fn generation(&self) -> u64 {
        self.inner.instance.generation()
    }

    /// Who issued this quest
    pub fn caller(&self) -> Option<&CallerInfo> {
        self.inner.caller.as_ref()
    }

    /// Whether this run is part of a creation chain
    pub fn is_in_create(&self) -> bool {
        self.inner.in_create
    }

    /// The runtime this actor lives in
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Time and randomness providers
    pub fn io(&self) -> &IoContext {
        self.inner.runtime.io()
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Dispatch an action through the type's reducers
    ///
    /// Returns whether the state changed.
    pub async fn dispatch(&self, action: impl Into<String>, payload: Value) -> Result<bool> {
        self.do_action(Action::new(action, payload)).await
    }

    /// Dispatch a prepared action
    pub async fn do_action(&self, action: Action) -> Result<bool> {
        let handled = self
            .inner
            .instance
            .actor_type()
            .logic()
            .contains(&action.kind);

        let changed = self.inner.instance.state().lock().await.dispatch(&action)?;
        if handled {
            self.inner.dispatched.store(true, Ordering::SeqCst);
        }

        trace!(actor_id = %self.id(), action = %action.kind, changed, "Action dispatched");
        Ok(changed)
    }

    /// Current snapshot
    pub async fn state(&self) -> State {
        self.inner.instance.snapshot().await
    }

    /// Value at a state path
    pub async fn get(&self, path: &str) -> Option<Value> {
        self.inner.instance.snapshot().await.get(path).cloned()
    }

    pub(crate) fn has_dispatched(&self) -> bool {
        self.inner.dispatched.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Deferred actions
    // =========================================================================

    /// Run `action` when this quest finalizes, after the body and the publish
    ///
    /// Deferred actions run last-registered first. Their failures are logged
    /// and never change the quest result.
    pub fn defer<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let action: DeferredAction = Box::new(move || action().boxed());
        self.inner
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }

    pub(crate) fn take_deferred(&self) -> Vec<DeferredAction> {
        std::mem::take(
            &mut *self
                .inner
                .deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    // =========================================================================
    // Nested invocations
    // =========================================================================

    fn nested(&self, quest: impl Into<String>, payload: Value) -> Invocation {
        Invocation::new(quest, payload)
            .with_caller(CallerInfo::new(self.id().clone(), self.quest()))
            .in_create(self.inner.in_create)
            .with_feed(self.inner.feed.clone())
    }

    /// Invoke a quest on another actor (or this one)
    pub async fn cmd(
        &self,
        target: &ActorId,
        quest: impl Into<String>,
        payload: Value,
    ) -> Result<QuestOutcome> {
        let invocation = self.nested(quest, payload);
        self.inner.runtime.invoke(target, invocation).await
    }

    /// Create an actor owned by this one
    pub async fn create(&self, target: &ActorId, payload: Value) -> Result<QuestOutcome> {
        let invocation = self
            .nested(horde_core::QUEST_CREATE, payload)
            .with_parent(self.id().clone());
        self.inner.runtime.invoke(target, invocation).await
    }

    /// Delete an actor at its current generation
    ///
    /// Deleting an absent actor is a no-op.
    pub async fn delete(&self, target: &ActorId) -> Result<QuestOutcome> {
        let Some(generation) = self.inner.runtime.generation(target).await else {
            return Ok(QuestOutcome::empty());
        };
        let invocation = self
            .nested(horde_core::QUEST_DELETE, Value::Null)
            .with_generation(generation);
        self.inner.runtime.invoke(target, invocation).await
    }
}
