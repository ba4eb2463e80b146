//! Invocation envelope
//!
//! One inbound quest call. Built by the caller, consumed once by the executor.

use horde_core::{ActorId, QUEST_CREATE, QUEST_DELETE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The actor and quest an invocation was issued from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerInfo {
    /// Calling actor
    pub id: ActorId,
    /// Quest the caller was running
    pub quest: String,
}

impl CallerInfo {
    /// Create caller info
    pub fn new(id: ActorId, quest: impl Into<String>) -> Self {
        Self {
            id,
            quest: quest.into(),
        }
    }
}

/// One quest call
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Quest name
    pub quest: String,
    /// Quest argument
    pub payload: Value,
    /// Issuing actor, `None` for top-level calls
    pub caller: Option<CallerInfo>,
    /// The caller is itself running inside a creation
    pub is_in_create: bool,
    /// Generation the call targets (mandatory for `delete`)
    pub generation: Option<u64>,
    /// Owning parent (mandatory for non-singleton `create`)
    pub parent: Option<ActorId>,
    /// Feed the branch is attached to
    pub feed: Option<String>,
    /// Message id, generated when absent
    pub msg_id: Option<String>,
}

impl Invocation {
    /// Create a top-level invocation
    pub fn new(quest: impl Into<String>, payload: Value) -> Self {
        let quest = quest.into();
        debug_assert!(!quest.is_empty(), "quest must not be empty");

        Self {
            quest,
            payload,
            caller: None,
            is_in_create: false,
            generation: None,
            parent: None,
            feed: None,
            msg_id: None,
        }
    }

    /// A `create` invocation owned by `parent`
    pub fn create(parent: ActorId, payload: Value) -> Self {
        Self::new(QUEST_CREATE, payload).with_parent(parent)
    }

    /// A `delete` invocation for `generation`
    pub fn delete(generation: u64) -> Self {
        Self::new(QUEST_DELETE, Value::Null).with_generation(generation)
    }

    /// Set the caller
    pub fn with_caller(mut self, caller: CallerInfo) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Mark the caller as running inside a creation
    pub fn in_create(mut self, in_create: bool) -> Self {
        self.is_in_create = in_create;
        self
    }

    /// Set the target generation
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Set the owning parent
    pub fn with_parent(mut self, parent: ActorId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set the feed
    pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
        self.feed = Some(feed.into());
        self
    }

    /// Set the message id
    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }

    /// Whether this is a `delete`
    pub fn is_delete(&self) -> bool {
        self.quest == QUEST_DELETE
    }

    /// Whether the caller is the target itself
    pub fn is_self_call(&self, target: &ActorId) -> bool {
        self.caller.as_ref().is_some_and(|c| &c.id == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invocation_builders() {
        let parent = ActorId::parse("desktop@main").unwrap();
        let inv = Invocation::create(parent.clone(), json!({"n": 1}))
            .with_feed("desktop@main")
            .with_msg_id("m-1");

        assert_eq!(inv.quest, "create");
        assert_eq!(inv.parent, Some(parent));
        assert_eq!(inv.feed.as_deref(), Some("desktop@main"));
        assert_eq!(inv.msg_id.as_deref(), Some("m-1"));
        assert!(!inv.is_delete());

        let inv = Invocation::delete(4);
        assert!(inv.is_delete());
        assert_eq!(inv.generation, Some(4));
    }

    #[test]
    fn test_self_call() {
        let target = ActorId::parse("counter@1").unwrap();
        let other = ActorId::parse("counter@2").unwrap();

        let inv = Invocation::new("increment", Value::Null);
        assert!(!inv.is_self_call(&target));

        let inv = inv.with_caller(CallerInfo::new(target.clone(), "create"));
        assert!(inv.is_self_call(&target));
        assert!(!inv.is_self_call(&other));
    }
}
