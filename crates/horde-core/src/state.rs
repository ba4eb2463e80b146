//! Actor state container
//!
//! State is an immutable JSON snapshot. Every mutation produces a new snapshot
//! (copy-on-write) and the container only advances through pure reducers
//! looked up by action type.

use crate::constants::STATE_PATH_DEPTH_MAX;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// State
// =============================================================================

/// Immutable state snapshot
///
/// Cloning is cheap (shared pointer). Equality is structural.
#[derive(Clone, PartialEq)]
pub struct State(Arc<Value>);

impl State {
    /// Wrap a JSON value
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// An empty object
    pub fn empty() -> Self {
        Self::new(Value::Object(Map::new()))
    }

    /// The underlying value
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Clone the underlying value out of the snapshot
    pub fn to_value(&self) -> Value {
        (*self.0).clone()
    }

    /// Whether two snapshots share the same allocation
    pub fn ptr_eq(&self, other: &State) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Read the value at a dot-separated path
    ///
    /// Numeric segments index arrays. The empty path is the root.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let segments = split_path(path).ok()?;
        let mut current = self.value();
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Return a new snapshot with `value` stored at `path`
    ///
    /// Missing intermediate objects are created. An array segment may address
    /// an existing index or append at `len`.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<State> {
        let segments = split_path(path)?;
        let value = value.into();

        let Some((last, parents)) = segments.split_last() else {
            return Ok(State::new(value));
        };

        let mut root = self.to_value();
        let mut current = &mut root;
        for segment in parents {
            current = descend_or_create(current, segment, path)?;
        }

        match current {
            Value::Object(map) => {
                map.insert((*last).to_string(), value);
            }
            Value::Array(items) => {
                let index = parse_index(last, path)?;
                if index < items.len() {
                    items[index] = value;
                } else if index == items.len() {
                    items.push(value);
                } else {
                    return Err(Error::InvalidStatePath {
                        path: path.to_string(),
                        reason: format!("index {} out of bounds ({})", index, items.len()),
                    });
                }
            }
            _ => {
                return Err(Error::InvalidStatePath {
                    path: path.to_string(),
                    reason: format!("segment '{}' is not a container", last),
                })
            }
        }

        Ok(State::new(root))
    }

    /// Return a new snapshot without the value at `path`
    ///
    /// Deleting a missing path returns the same snapshot. Deleting the root
    /// yields an empty object.
    pub fn delete(&self, path: &str) -> Result<State> {
        let segments = split_path(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Ok(State::empty());
        };

        if self.get(&parents.join(".")).is_none() || self.get(path).is_none() {
            return Ok(self.clone());
        }

        let mut root = self.to_value();
        let mut current = &mut root;
        for segment in parents {
            current = match current {
                Value::Object(map) => map.get_mut(*segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get_mut(index)),
                _ => None,
            }
            .ok_or_else(|| Error::internal(format!("state path vanished: {}", path)))?;
        }

        match current {
            Value::Object(map) => {
                map.remove(*last);
            }
            Value::Array(items) => {
                let index = parse_index(last, path)?;
                if index < items.len() {
                    items.remove(index);
                }
            }
            _ => {}
        }

        Ok(State::new(root))
    }
}

impl Default for State {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "State({})", self.0)
    }
}

impl From<Value> for State {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl Serialize for State {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Value::deserialize(deserializer).map(State::new)
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }

    let segments: Vec<&str> = path.split('.').collect();
    if segments.len() > STATE_PATH_DEPTH_MAX {
        return Err(Error::InvalidStatePath {
            path: path.to_string(),
            reason: format!("depth {} exceeds limit {}", segments.len(), STATE_PATH_DEPTH_MAX),
        });
    }
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidStatePath {
            path: path.to_string(),
            reason: "empty segment".into(),
        });
    }
    Ok(segments)
}

fn parse_index(segment: &str, path: &str) -> Result<usize> {
    segment.parse::<usize>().map_err(|_| Error::InvalidStatePath {
        path: path.to_string(),
        reason: format!("segment '{}' is not an array index", segment),
    })
}

fn descend_or_create<'a>(current: &'a mut Value, segment: &str, path: &str) -> Result<&'a mut Value> {
    if current.is_null() {
        *current = Value::Object(Map::new());
    }

    match current {
        Value::Object(map) => Ok(map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) => {
            let index = parse_index(segment, path)?;
            let len = items.len();
            items.get_mut(index).ok_or_else(|| Error::InvalidStatePath {
                path: path.to_string(),
                reason: format!("index {} out of bounds ({})", index, len),
            })
        }
        _ => Err(Error::InvalidStatePath {
            path: path.to_string(),
            reason: format!("segment '{}' crosses a scalar", segment),
        }),
    }
}

// =============================================================================
// Actions and reducers
// =============================================================================

/// An action dispatched to the state container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action type, used to look up the reducer
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-form payload
    #[serde(default)]
    pub payload: Value,
}

impl Action {
    /// Create an action
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Read a payload field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Pure reducer `(state, action) -> state`
pub type Reducer = Arc<dyn Fn(&State, &Action) -> Result<State> + Send + Sync>;

/// Reducer table keyed by action type
#[derive(Clone, Default)]
pub struct LogicHandlers {
    reducers: HashMap<String, Reducer>,
}

impl LogicHandlers {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reducer (builder style)
    pub fn with<F>(mut self, kind: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(&State, &Action) -> Result<State> + Send + Sync + 'static,
    {
        self.insert(kind, reducer);
        self
    }

    /// Register a reducer, replacing any previous one for the same type
    pub fn insert<F>(&mut self, kind: impl Into<String>, reducer: F)
    where
        F: Fn(&State, &Action) -> Result<State> + Send + Sync + 'static,
    {
        self.reducers.insert(kind.into(), Arc::new(reducer));
    }

    /// Look up a reducer
    pub fn get(&self, kind: &str) -> Option<&Reducer> {
        self.reducers.get(kind)
    }

    /// Whether a reducer is registered for `kind`
    pub fn contains(&self, kind: &str) -> bool {
        self.reducers.contains_key(kind)
    }

    /// Number of registered reducers
    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl fmt::Debug for LogicHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&String> = self.reducers.keys().collect();
        kinds.sort();
        f.debug_struct("LogicHandlers").field("actions", &kinds).finish()
    }
}

// =============================================================================
// StateContainer
// =============================================================================

/// Versioned holder of an actor's state
///
/// `version` increases every time a dispatch yields a structurally different
/// snapshot. `dispatched` records whether any reducer ran since the last
/// reset; the quest executor uses it to decide whether to publish.
#[derive(Debug, Clone)]
pub struct StateContainer {
    state: State,
    version: u64,
    logic: Arc<LogicHandlers>,
    dispatched: bool,
}

impl StateContainer {
    /// Create a container with an initial snapshot and reducer table
    pub fn new(initial: State, logic: Arc<LogicHandlers>) -> Self {
        Self {
            state: initial,
            version: 0,
            logic,
            dispatched: false,
        }
    }

    /// Current snapshot
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Current version
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Dispatch an action
    ///
    /// Returns `true` when the snapshot changed. Unknown action types leave the
    /// state untouched and do not count as dispatched.
    pub fn dispatch(&mut self, action: &Action) -> Result<bool> {
        let Some(reducer) = self.logic.get(&action.kind) else {
            return Ok(false);
        };

        let next = reducer(&self.state, action)?;
        self.dispatched = true;

        if next == self.state {
            return Ok(false);
        }

        self.state = next;
        self.version = self.version.wrapping_add(1);
        Ok(true)
    }

    /// Whether any reducer ran since the last reset
    pub fn has_dispatched(&self) -> bool {
        self.dispatched
    }

    /// Clear the dispatched flag
    pub fn reset_dispatched(&mut self) {
        self.dispatched = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter_logic() -> Arc<LogicHandlers> {
        Arc::new(
            LogicHandlers::new()
                .with("increment", |state, _action| {
                    let count = state.get("count").and_then(Value::as_i64).unwrap_or(0);
                    state.set("count", count + 1)
                })
                .with("noop", |state, _action| Ok(state.clone())),
        )
    }

    #[test]
    fn test_state_get_nested() {
        let state = State::new(json!({"a": {"b": [10, {"c": "x"}]}}));
        assert_eq!(state.get("a.b.0"), Some(&json!(10)));
        assert_eq!(state.get("a.b.1.c"), Some(&json!("x")));
        assert_eq!(state.get("a.missing"), None);
        assert_eq!(state.get(""), Some(state.value()));
    }

    #[test]
    fn test_state_set_is_copy_on_write() {
        let original = State::new(json!({"a": 1}));
        let updated = original.set("b.c", "value").unwrap();

        assert_eq!(original.get("b"), None);
        assert_eq!(updated.get("b.c"), Some(&json!("value")));
        assert_eq!(updated.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_state_set_array_index_and_append() {
        let state = State::new(json!({"list": [1, 2]}));
        let state = state.set("list.0", 9).unwrap();
        let state = state.set("list.2", 3).unwrap();
        assert_eq!(state.get("list"), Some(&json!([9, 2, 3])));
        assert!(state.set("list.7", 1).is_err());
    }

    #[test]
    fn test_state_set_through_scalar_fails() {
        let state = State::new(json!({"a": 1}));
        assert!(matches!(
            state.set("a.b", 2),
            Err(Error::InvalidStatePath { .. })
        ));
        assert!(state.set("a..b", 2).is_err());
    }

    #[test]
    fn test_state_delete() {
        let state = State::new(json!({"a": {"b": 1, "c": 2}, "l": [1, 2, 3]}));
        let deleted = state.delete("a.b").unwrap();
        assert_eq!(deleted.get("a"), Some(&json!({"c": 2})));
        let deleted = deleted.delete("l.1").unwrap();
        assert_eq!(deleted.get("l"), Some(&json!([1, 3])));

        let untouched = state.delete("nope.nothing").unwrap();
        assert!(untouched.ptr_eq(&state));
    }

    #[test]
    fn test_state_structural_equality() {
        let a = State::new(json!({"x": [1, 2]}));
        let b = State::new(json!({"x": [1, 2]}));
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn test_container_dispatch_advances_version() {
        let mut container = StateContainer::new(State::empty(), counter_logic());
        assert!(!container.has_dispatched());

        assert!(container.dispatch(&Action::new("increment", Value::Null)).unwrap());
        assert!(container.dispatch(&Action::new("increment", Value::Null)).unwrap());

        assert_eq!(container.state().get("count"), Some(&json!(2)));
        assert_eq!(container.version(), 2);
        assert!(container.has_dispatched());
    }

    #[test]
    fn test_container_unknown_action_is_ignored() {
        let mut container = StateContainer::new(State::empty(), counter_logic());
        assert!(!container.dispatch(&Action::new("unknown", Value::Null)).unwrap());
        assert_eq!(container.version(), 0);
        assert!(!container.has_dispatched());
    }

    #[test]
    fn test_container_noop_reducer_marks_dispatched() {
        let mut container = StateContainer::new(State::empty(), counter_logic());
        assert!(!container.dispatch(&Action::new("noop", Value::Null)).unwrap());
        assert_eq!(container.version(), 0);
        assert!(container.has_dispatched());

        container.reset_dispatched();
        assert!(!container.has_dispatched());
    }

    #[test]
    fn test_action_serde_uses_type_field() {
        let action: Action = serde_json::from_value(json!({"type": "increment"})).unwrap();
        assert_eq!(action.kind, "increment");
        assert_eq!(action.payload, Value::Null);
    }
}
