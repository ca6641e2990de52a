//! Error types for shepherd
//!
//! This module defines the main error type used throughout the crate plus
//! the structured domain errors that flow through a managed group's
//! persistent error channel.

use thiserror::Error;

/// Result type alias for shepherd operations
pub type Result<T> = std::result::Result<T, ShepherdError>;

/// State-machine violations on a managed group
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GroupError {
    /// `start` was called while the group is already Running
    #[error("group is already running")]
    AlreadyRunning,
    /// `stop` was called while the group is not Running
    #[error("group is not running")]
    NotRunning,
    /// The group has transitioned to Closed and accepts no further operations
    #[error("group has been closed")]
    Closed,
}

/// Runtime errors surfaced by a consumer session or a record handler.
///
/// These are the values delivered on a managed group's persistent error
/// stream, so they are `Clone` and carry no non-cloneable sources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The blocking consume call returned a non-terminal error
    #[error("consume failed: {0}")]
    Consume(String),
    /// The record handler rejected a delivered record
    #[error("handler failed on {topic}[{partition}] at offset {offset}: {detail}")]
    Handler {
        topic: String,
        partition: i32,
        offset: i64,
        detail: String,
    },
    /// An error reported on the session's own error stream
    #[error("{0}")]
    Message(String),
}

impl SessionError {
    pub fn consume(detail: impl Into<String>) -> Self {
        Self::Consume(detail.into())
    }

    pub fn handler(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        detail: impl Into<String>,
    ) -> Self {
        Self::Handler {
            topic: topic.into(),
            partition,
            offset,
            detail: detail.into(),
        }
    }
}

impl From<String> for SessionError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for SessionError {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

/// Main error type for shepherd operations
#[derive(Debug, Error)]
pub enum ShepherdError {
    /// The underlying client library refused to create a session
    #[error("failed to create consumer session for group '{group_id}': {detail}")]
    FactoryFailed { group_id: String, detail: String },

    /// An operation referenced a group id that is not under management
    #[error("consumer group '{0}' is not managed")]
    NotManaged(String),

    /// Start was requested for a group id that is already registered
    #[error("consumer group '{0}' is already managed")]
    AlreadyManaged(String),

    /// A `lock_before` acquisition timed out against a different token
    #[error("command lock on group '{0}' is held by another token")]
    LockConflict(String),

    /// Sentinel: the session was closed out from under a blocking consume
    /// call. The supervised loop absorbs this; it is never surfaced.
    #[error("consumer group session was closed")]
    ClosedGroup,

    /// A session-level runtime error
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// A group state-machine violation
    #[error("group state error: {0}")]
    Group(#[from] GroupError),

    /// A control command carried a payload version other than the compiled one
    #[error("command version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u16, got: u16 },

    /// The operation raced a close or manager shutdown
    #[error("manager is shutting down")]
    ShuttingDown,

    /// An invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Combined failures from an operation that spans many groups
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl ShepherdError {
    pub fn factory_failed(group_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::FactoryFailed {
            group_id: group_id.into(),
            detail: detail.into(),
        }
    }

    pub fn not_managed(group_id: impl Into<String>) -> Self {
        Self::NotManaged(group_id.into())
    }

    pub fn already_managed(group_id: impl Into<String>) -> Self {
        Self::AlreadyManaged(group_id.into())
    }

    pub fn lock_conflict(group_id: impl Into<String>) -> Self {
        Self::LockConflict(group_id.into())
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config(detail.into())
    }

    pub fn version_mismatch(expected: u16, got: u16) -> Self {
        Self::VersionMismatch { expected, got }
    }

    /// True for the closed-session sentinel the supervised loop tests for
    /// to decide restart vs. report.
    pub fn is_closed_group(&self) -> bool {
        matches!(self, Self::ClosedGroup)
    }

    /// True when the error indicates a lock held by another token.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::LockConflict(_))
    }
}

/// Collected failures from an operation spanning several groups, such as
/// reconfigure or manager shutdown. Empty aggregates convert to `Ok(())`.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<ShepherdError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ShepherdError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ShepherdError] {
        &self.errors
    }

    /// Fold the aggregate into a `Result`: `Ok(())` when no failure was
    /// recorded, otherwise a single combined error.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ShepherdError::Aggregate(self))
        }
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} operation(s) failed: ", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
