//! Actor type definitions
//!
//! An actor type is the kind name, its initial state, its reducer table and an
//! explicit quest table. Types are assembled once with [`ActorTypeBuilder`]
//! and registered with the runtime.

use crate::context::QuestContext;
use crate::lanes::Lane;
use futures::future::BoxFuture;
use futures::FutureExt;
use horde_core::{
    Action, ActorId, ActorTypeOptions, Error, LogicHandlers, Result, Scheduling, State,
    QUEST_CREATE, QUEST_DELETE, QUEST_INIT,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a quest body returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum QuestOutcome {
    /// Completed with a value
    Done(Value),
    /// Cooperatively canceled; nothing is published
    Canceled,
}

impl QuestOutcome {
    /// Completed with a value
    pub fn done(value: impl Into<Value>) -> Self {
        Self::Done(value.into())
    }

    /// Completed without a value
    pub fn empty() -> Self {
        Self::Done(Value::Null)
    }

    /// Whether the quest was canceled
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// The returned value, `None` when canceled
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Done(value) => Some(value),
            Self::Canceled => None,
        }
    }

    /// Consume into the returned value, `Null` when canceled
    pub fn into_value(self) -> Value {
        match self {
            Self::Done(value) => value,
            Self::Canceled => Value::Null,
        }
    }
}

/// Boxed quest future
pub type QuestFuture = BoxFuture<'static, Result<QuestOutcome>>;

/// Quest body
pub type QuestHandler = Arc<dyn Fn(QuestContext, Value) -> QuestFuture + Send + Sync>;

/// Lane a quest runs on when no creation rule applies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QuestMode {
    /// Follow the type's scheduling
    #[default]
    Inherit,
    /// Always serie
    Serie,
    /// Always parallel
    Parallel,
    /// Always immediate
    Immediate,
}

/// A registered quest
#[derive(Clone)]
pub struct QuestDef {
    handler: QuestHandler,
    mode: QuestMode,
}

impl QuestDef {
    /// The quest body
    pub fn handler(&self) -> &QuestHandler {
        &self.handler
    }

    /// Registered mode
    pub fn mode(&self) -> QuestMode {
        self.mode
    }
}

impl fmt::Debug for QuestDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuestDef").field("mode", &self.mode).finish()
    }
}

fn noop_quest() -> QuestDef {
    QuestDef {
        handler: Arc::new(|_ctx, _payload| async { Ok(QuestOutcome::empty()) }.boxed()),
        mode: QuestMode::Inherit,
    }
}

// =============================================================================
// ActorType
// =============================================================================

/// A registered actor type
pub struct ActorType {
    kind: String,
    initial_state: State,
    logic: Arc<LogicHandlers>,
    quests: HashMap<String, QuestDef>,
    options: ActorTypeOptions,
    noop: QuestDef,
}

impl fmt::Debug for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut quests: Vec<&String> = self.quests.keys().collect();
        quests.sort();
        f.debug_struct("ActorType")
            .field("kind", &self.kind)
            .field("quests", &quests)
            .field("logic", &self.logic)
            .field("options", &self.options)
            .finish()
    }
}

impl ActorType {
    /// Start building a type
    pub fn builder(kind: impl Into<String>) -> ActorTypeBuilder {
        ActorTypeBuilder::new(kind)
    }

    /// Kind name
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// State a new instance starts from
    pub fn initial_state(&self) -> &State {
        &self.initial_state
    }

    /// Reducer table
    pub fn logic(&self) -> &Arc<LogicHandlers> {
        &self.logic
    }

    /// Registration options
    pub fn options(&self) -> &ActorTypeOptions {
        &self.options
    }

    /// Whether the type is a singleton
    pub fn is_singleton(&self) -> bool {
        self.options.singleton
    }

    /// Whether `quest` is registered
    ///
    /// `delete` is always accepted, and so is `init` on singletons.
    pub fn has_quest(&self, quest: &str) -> bool {
        self.quests.contains_key(quest)
            || quest == QUEST_DELETE
            || (self.is_singleton() && quest == QUEST_INIT)
    }

    /// Look up a quest; implicit `delete`/`init` resolve to a no-op
    pub fn quest(&self, quest: &str) -> Option<&QuestDef> {
        match self.quests.get(quest) {
            Some(def) => Some(def),
            None if self.has_quest(quest) => Some(&self.noop),
            None => None,
        }
    }

    /// Whether `quest` creates an instance of this type
    pub fn is_creation_quest(&self, quest: &str) -> bool {
        quest == QUEST_CREATE || (self.is_singleton() && quest == QUEST_INIT)
    }

    /// Lane used when no creation rule applies
    pub fn regular_lane(&self, quest: &str) -> Lane {
        let mode = self.quests.get(quest).map(QuestDef::mode).unwrap_or_default();
        match mode {
            QuestMode::Serie => Lane::Serie,
            QuestMode::Parallel => Lane::Parallel,
            QuestMode::Immediate => Lane::Immediate,
            QuestMode::Inherit => match self.options.scheduling {
                Scheduling::Serie => Lane::Serie,
                Scheduling::Parallel => Lane::Parallel,
            },
        }
    }

    /// Check an id against this type
    pub fn validate_id(&self, id: &ActorId) -> Result<()> {
        id.validate(&self.kind)?;
        if self.is_singleton() != id.is_singleton() {
            return Err(Error::InvalidActorId {
                id: id.to_string(),
                reason: if self.is_singleton() {
                    format!("'{}' is a singleton, address it by its bare kind", self.kind)
                } else {
                    format!("'{}' instances need a unique id", self.kind)
                },
            });
        }
        Ok(())
    }
}

// =============================================================================
// ActorTypeBuilder
// =============================================================================

/// Builder for [`ActorType`]
pub struct ActorTypeBuilder {
    kind: String,
    initial_state: State,
    logic: LogicHandlers,
    quests: HashMap<String, QuestDef>,
    duplicates: Vec<String>,
    options: ActorTypeOptions,
}

impl ActorTypeBuilder {
    /// Start a type named `kind`
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            initial_state: State::empty(),
            logic: LogicHandlers::new(),
            quests: HashMap::new(),
            duplicates: Vec::new(),
            options: ActorTypeOptions::default(),
        }
    }

    /// Initial state of every instance
    pub fn initial_state(mut self, value: Value) -> Self {
        self.initial_state = State::new(value);
        self
    }

    /// Register a reducer
    pub fn reducer<F>(mut self, action: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(&State, &Action) -> Result<State> + Send + Sync + 'static,
    {
        self.logic.insert(action, reducer);
        self
    }

    /// Replace the whole reducer table
    pub fn logic(mut self, logic: LogicHandlers) -> Self {
        self.logic = logic;
        self
    }

    /// Register a quest on the type's regular lane
    pub fn quest<F, Fut>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(QuestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<QuestOutcome>> + Send + 'static,
    {
        self.quest_with_mode(name, QuestMode::Inherit, body)
    }

    /// Register a quest with an explicit lane discipline
    pub fn quest_with_mode<F, Fut>(mut self, name: impl Into<String>, mode: QuestMode, body: F) -> Self
    where
        F: Fn(QuestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<QuestOutcome>> + Send + 'static,
    {
        let name = name.into();
        let handler: QuestHandler = Arc::new(move |ctx, payload| body(ctx, payload).boxed());
        if self
            .quests
            .insert(name.clone(), QuestDef { handler, mode })
            .is_some()
        {
            self.duplicates.push(name);
        }
        self
    }

    /// Replace all options
    pub fn options(mut self, options: ActorTypeOptions) -> Self {
        self.options = options;
        self
    }

    /// Single instance addressed by the bare kind
    pub fn singleton(mut self) -> Self {
        self.options.singleton = true;
        self
    }

    /// Bounded eviction cache
    pub fn cache_size(mut self, size: usize) -> Self {
        self.options.cache_size = size;
        self
    }

    /// TTL override
    pub fn ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.options.ttl_ms = Some(ttl_ms);
        self
    }

    /// Regular-lane discipline
    pub fn scheduling(mut self, scheduling: Scheduling) -> Self {
        self.options.scheduling = scheduling;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    /// Invalid kind, invalid options, duplicate quests, an empty quest name,
    /// or a non-singleton type without a `create` quest.
    pub fn build(self) -> Result<ActorType> {
        let probe = ActorId::parse(self.kind.clone())?;
        if !probe.is_singleton() {
            return Err(Error::InvalidConfiguration {
                field: "kind".into(),
                reason: format!("'{}' must not contain '@'", self.kind),
            });
        }

        self.options.validate()?;

        if let Some(name) = self.duplicates.first() {
            return Err(Error::InvalidConfiguration {
                field: format!("quests.{}", name),
                reason: "registered twice".into(),
            });
        }

        if self.quests.keys().any(|q| q.is_empty() || q.contains('.')) {
            return Err(Error::InvalidConfiguration {
                field: "quests".into(),
                reason: "quest names must be non-empty and contain no '.'".into(),
            });
        }

        if !self.options.singleton && !self.quests.contains_key(QUEST_CREATE) {
            return Err(Error::InvalidConfiguration {
                field: format!("quests.{}", QUEST_CREATE),
                reason: format!("'{}' is not a singleton and has no create quest", self.kind),
            });
        }

        Ok(ActorType {
            kind: self.kind,
            initial_state: self.initial_state,
            logic: Arc::new(self.logic),
            quests: self.quests,
            options: self.options,
            noop: noop_quest(),
        })
    }
}
