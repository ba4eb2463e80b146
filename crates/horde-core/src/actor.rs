//! Actor identity
//!
//! An actor address is `kind@unique-id`. Everything after the first `@` is the
//! unique id and may itself contain `@` (ids built from other ids). Singleton
//! actors are addressed by their bare kind.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// ActorId
// =============================================================================

/// Parsed actor address
///
/// Construction validates the structure (non-empty kind, length, no
/// whitespace or control characters). Whether the id is acceptable for a given
/// actor type is a separate question answered by [`ActorId::is_valid`].
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorId {
    raw: String,
    /// Byte offset of the first `@`, if any
    separator: Option<usize>,
}

impl ActorId {
    /// Parse a raw actor address
    ///
    /// # Errors
    /// Returns error if the address is empty, too long, has an empty kind, or
    /// contains whitespace or control characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();

        if raw.is_empty() {
            return Err(Error::InvalidActorId {
                id: raw,
                reason: "id must not be empty".into(),
            });
        }

        if raw.len() > ACTOR_ID_LENGTH_BYTES_MAX {
            return Err(Error::ActorIdTooLong {
                length: raw.len(),
                limit: ACTOR_ID_LENGTH_BYTES_MAX,
            });
        }

        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidActorId {
                id: raw,
                reason: "id contains whitespace or control characters".into(),
            });
        }

        let separator = raw.find('@');
        let kind_len = separator.unwrap_or(raw.len());

        if kind_len == 0 {
            return Err(Error::InvalidActorId {
                id: raw,
                reason: "kind segment is empty".into(),
            });
        }

        if kind_len > ACTOR_KIND_LENGTH_BYTES_MAX {
            return Err(Error::InvalidActorId {
                id: raw,
                reason: format!(
                    "kind length {} exceeds limit {}",
                    kind_len, ACTOR_KIND_LENGTH_BYTES_MAX
                ),
            });
        }

        debug_assert!(separator.map_or(true, |s| s < raw.len()));
        Ok(Self { raw, separator })
    }

    /// Build an id from its kind and unique id
    pub fn new(kind: impl AsRef<str>, unique_id: impl AsRef<str>) -> Result<Self> {
        Self::parse(format!("{}@{}", kind.as_ref(), unique_id.as_ref()))
    }

    /// Build a singleton id (the bare kind)
    pub fn singleton(kind: impl Into<String>) -> Result<Self> {
        let id = Self::parse(kind)?;
        if !id.is_singleton() {
            return Err(Error::InvalidActorId {
                id: id.raw,
                reason: "singleton id must not contain '@'".into(),
            });
        }
        Ok(id)
    }

    /// The kind segment
    pub fn kind(&self) -> &str {
        match self.separator {
            Some(at) => &self.raw[..at],
            None => &self.raw,
        }
    }

    /// The unique id segment, `None` for singletons
    pub fn unique_id(&self) -> Option<&str> {
        self.separator.map(|at| &self.raw[at + 1..])
    }

    /// Whether this id addresses a singleton (no `@`)
    pub fn is_singleton(&self) -> bool {
        self.separator.is_none()
    }

    /// The raw address
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check this id against an expected kind
    ///
    /// Fails when the kind mismatches (unless `expected_kind` is the wildcard
    /// `*`) or when the unique id segment is empty.
    pub fn is_valid(&self, expected_kind: &str) -> bool {
        self.validate(expected_kind).is_ok()
    }

    /// Same as [`ActorId::is_valid`], reporting the reason
    pub fn validate(&self, expected_kind: &str) -> Result<()> {
        if expected_kind != ACTOR_KIND_WILDCARD && self.kind() != expected_kind {
            return Err(Error::InvalidActorId {
                id: self.raw.clone(),
                reason: format!("expected kind '{}', got '{}'", expected_kind, self.kind()),
            });
        }

        match self.unique_id() {
            Some("") => Err(Error::InvalidActorId {
                id: self.raw.clone(),
                reason: "unique id segment is empty".into(),
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ActorId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ActorId {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(raw)
    }
}

impl From<ActorId> for String {
    fn from(id: ActorId) -> Self {
        id.raw
    }
}

impl AsRef<str> for ActorId {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_id_parse() {
        let id = ActorId::parse("workitem@1234").unwrap();
        assert_eq!(id.kind(), "workitem");
        assert_eq!(id.unique_id(), Some("1234"));
        assert!(!id.is_singleton());
        assert_eq!(id.as_str(), "workitem@1234");
    }

    #[test]
    fn test_actor_id_nested_unique_id() {
        let id = ActorId::parse("desktop@main@alice").unwrap();
        assert_eq!(id.kind(), "desktop");
        assert_eq!(id.unique_id(), Some("main@alice"));
    }

    #[test]
    fn test_actor_id_singleton() {
        let id = ActorId::singleton("laboratory").unwrap();
        assert!(id.is_singleton());
        assert_eq!(id.kind(), "laboratory");
        assert_eq!(id.unique_id(), None);
        assert!(ActorId::singleton("laboratory@1").is_err());
    }

    #[test]
    fn test_actor_id_rejects_malformed() {
        assert!(ActorId::parse("").is_err());
        assert!(ActorId::parse("@123").is_err());
        assert!(ActorId::parse("work item@1").is_err());
        let long = format!("k@{}", "a".repeat(ACTOR_ID_LENGTH_BYTES_MAX));
        assert!(matches!(
            ActorId::parse(long),
            Err(Error::ActorIdTooLong { .. })
        ));
    }

    #[test]
    fn test_actor_id_is_valid() {
        let id = ActorId::parse("workitem@1234").unwrap();
        assert!(id.is_valid("workitem"));
        assert!(id.is_valid("*"));
        assert!(!id.is_valid("desktop"));

        let empty_unique = ActorId::parse("workitem@").unwrap();
        assert!(!empty_unique.is_valid("workitem"));
        assert!(!empty_unique.is_valid("*"));
    }

    #[test]
    fn test_actor_id_serde_roundtrip_validates() {
        let id = ActorId::new("counter", "7").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"counter@7\"");
        let back: ActorId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ActorId>("\"\"").is_err());
    }

    #[test]
    fn test_actor_id_display() {
        let id: ActorId = "ns@id".parse().unwrap();
        assert_eq!(format!("{}", id), "ns@id");
    }

    #[test]
    fn test_actor_id_ordering() {
        let ids: std::collections::BTreeSet<ActorId> = ["window@b", "desktop@main", "window@a"]
            .into_iter()
            .map(|raw| ActorId::parse(raw).unwrap())
            .collect();
        let ordered: Vec<&str> = ids.iter().map(ActorId::as_str).collect();
        assert_eq!(ordered, vec!["desktop@main", "window@a", "window@b"]);
    }
}
