//! Error types for Horde
//!
//! Explicit error types with context, using thiserror. Failures inside a quest
//! never cross the actor boundary as `Error` values directly: they are folded
//! into a [`QuestError`] which is cloneable and serialisable, so that a single
//! creation result can be broadcast to every waiting caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for Horde operations
pub type Result<T> = std::result::Result<T, Error>;

/// Horde error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Identity Errors
    // =========================================================================
    #[error("Invalid actor ID: {id}, reason: {reason}")]
    InvalidActorId { id: String, reason: String },

    #[error("Actor ID too long: {length} bytes exceeds limit of {limit} bytes")]
    ActorIdTooLong { length: usize, limit: usize },

    // =========================================================================
    // Registration Errors
    // =========================================================================
    #[error("Unknown actor type: {kind}")]
    UnknownActorType { kind: String },

    #[error("Actor type already registered: {kind}")]
    ActorTypeAlreadyRegistered { kind: String },

    #[error("Unknown quest: {id}.{quest}")]
    UnknownQuest { id: String, quest: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Actor not found: {id}")]
    ActorNotFound { id: String },

    #[error("Actor deleted: {id}")]
    ActorDeleted { id: String },

    #[error("Actor limit reached: {max} live instances")]
    ActorLimitReached { max: usize },

    #[error("Actor lanes full: {id}, depth: {depth}, max: {max}")]
    ActorMailboxFull {
        id: String,
        depth: usize,
        max: usize,
    },

    #[error("Runtime is shutting down")]
    ShuttingDown,

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    #[error("Missing generation: {id}.{quest}")]
    MissingGeneration { id: String, quest: String },

    #[error("Missing parent for non-singleton create: {id}")]
    MissingParent { id: String },

    #[error("Protocol violation on {id}: {reason}")]
    ProtocolViolation { id: String, reason: String },

    #[error("Caller {caller} is blocked from {command}")]
    Blocked { caller: String, command: String },

    // =========================================================================
    // Quest Errors
    // =========================================================================
    #[error("Parent feed vanished while attaching {id}: {reason}")]
    SilentHill { id: String, reason: String },

    #[error("Create quest of {id} finished without dispatching any state")]
    CreateWithoutState { id: String },

    #[error("Quest panicked: {message}")]
    QuestPanicked { message: String },

    #[error("Quest failed: {0}")]
    Quest(QuestError),

    #[error("Operation timed out: {operation} after {timeout_ms}ms")]
    OperationTimedOut { operation: String, timeout_ms: u64 },

    // =========================================================================
    // State Errors
    // =========================================================================
    #[error("Invalid state path: {path}, reason: {reason}")]
    InvalidStatePath { path: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an actor not found error
    pub fn actor_not_found(id: impl Into<String>) -> Self {
        Self::ActorNotFound { id: id.into() }
    }

    /// Create a protocol violation error
    pub fn protocol_violation(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ActorMailboxFull { .. }
                | Self::ActorLimitReached { .. }
                | Self::OperationTimedOut { .. }
        )
    }

    /// Check if this error is a soft, expected failure
    pub fn is_soft(&self) -> bool {
        self.code() == ErrorCode::SilentHill
    }

    /// Classify the error for the terminal error event
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SilentHill { .. } => ErrorCode::SilentHill,
            Self::ProtocolViolation { .. }
            | Self::MissingGeneration { .. }
            | Self::MissingParent { .. } => ErrorCode::ProtocolViolation,
            Self::CreateWithoutState { .. } => ErrorCode::CreateWithoutState,
            Self::ActorDeleted { .. } => ErrorCode::ActorDeleted,
            Self::UnknownQuest { .. } => ErrorCode::UnknownQuest,
            Self::QuestPanicked { .. } => ErrorCode::QuestPanicked,
            Self::Quest(e) => e.code,
            _ => ErrorCode::QuestFailed,
        }
    }
}

/// Stable classification carried by terminal error events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The quest body returned an error
    QuestFailed,
    /// The quest body panicked
    QuestPanicked,
    /// Attaching to a vanished parent feed
    SilentHill,
    /// Generation ordering or mandatory fields violated
    ProtocolViolation,
    /// A non-singleton create never dispatched state
    CreateWithoutState,
    /// The actor was deleted before the quest could run
    ActorDeleted,
    /// The quest is not registered for the actor type
    UnknownQuest,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorCode::QuestFailed => "QUEST_FAILED",
            ErrorCode::QuestPanicked => "QUEST_PANICKED",
            ErrorCode::SilentHill => "SILENT_HILL",
            ErrorCode::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorCode::CreateWithoutState => "CREATE_WITHOUT_STATE",
            ErrorCode::ActorDeleted => "ACTOR_DELETED",
            ErrorCode::UnknownQuest => "UNKNOWN_QUEST",
        };
        f.write_str(code)
    }
}

/// Terminal error delivered to callers and published as `.error` event
///
/// `id` is a stable error id generated once per failure; every caller folded
/// into the same creation receives the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestError {
    /// Stable error id
    pub id: String,
    /// Error classification
    pub code: ErrorCode,
    /// Human readable message
    pub message: String,
    /// Quest location chain followed by a captured backtrace, never empty
    pub stack: String,
}

impl QuestError {
    /// Build a quest error from a runtime error
    pub fn from_error(error: &Error, id: impl Into<String>, stack: impl Into<String>) -> Self {
        let message = error.to_string();
        let mut stack = stack.into();
        if stack.is_empty() {
            stack = message.clone();
        }
        Self {
            id: id.into(),
            code: error.code(),
            message,
            stack,
        }
    }

    /// Whether this error is the soft `SILENT_HILL` failure
    pub fn is_silent_hill(&self) -> bool {
        self.code == ErrorCode::SilentHill
    }
}

impl fmt::Display for QuestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (error id {})", self.code, self.message, self.id)
    }
}

impl std::error::Error for QuestError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::actor_not_found("counter@1");
        assert!(err.to_string().contains("counter@1"));
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::ActorLimitReached { max: 1 }.is_retriable());
        assert!(!Error::actor_not_found("counter@1").is_retriable());
    }

    #[test]
    fn test_error_codes() {
        let err = Error::SilentHill {
            id: "counter@1".into(),
            reason: "feed gone".into(),
        };
        assert_eq!(err.code(), ErrorCode::SilentHill);
        assert!(err.is_soft());

        let err = Error::MissingGeneration {
            id: "counter@1".into(),
            quest: "delete".into(),
        };
        assert_eq!(err.code(), ErrorCode::ProtocolViolation);
        assert!(!err.is_soft());

        let err = Error::QuestPanicked {
            message: "index out of bounds".into(),
        };
        assert_eq!(err.code(), ErrorCode::QuestPanicked);
    }

    #[test]
    fn test_quest_error_stack_never_empty() {
        let err = Error::internal("boom");
        let quest_error = QuestError::from_error(&err, "err-1", "");
        assert_eq!(quest_error.code, ErrorCode::QuestFailed);
        assert!(!quest_error.stack.is_empty());
        assert!(quest_error.message.contains("boom"));
    }

    #[test]
    fn test_quest_error_code_survives_wrapping() {
        let inner = QuestError {
            id: "err-2".into(),
            code: ErrorCode::QuestPanicked,
            message: "panic".into(),
            stack: "at counter@1.increment".into(),
        };
        assert_eq!(Error::Quest(inner).code(), ErrorCode::QuestPanicked);
    }

    #[test]
    fn test_error_code_serializes_screaming() {
        let json = serde_json::to_string(&ErrorCode::SilentHill).unwrap();
        assert_eq!(json, "\"SILENT_HILL\"");
        assert_eq!(ErrorCode::SilentHill.to_string(), "SILENT_HILL");
    }
}
