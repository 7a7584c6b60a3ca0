//! Error types for Horizon Grid core.

use crate::element::ElementKind;
use crate::event::EventKind;

/// Errors raised while building the event taxonomy.
///
/// These are configuration errors: they indicate a broken static table and
/// are reported once, at construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The same event kind was described more than once.
    #[error("Event kind {0:?} is described more than once in the taxonomy")]
    DuplicateKind(EventKind),
    /// An event kind has no taxonomy entry.
    #[error("Event kind {0:?} has no taxonomy entry")]
    MissingKind(EventKind),
    /// A before kind was paired with something that is not an after kind.
    #[error("Event kind {before:?} is paired with {after:?}, which is not an after kind")]
    InvalidPairing {
        /// The vetoable kind.
        before: EventKind,
        /// The kind it was paired with.
        after: EventKind,
    },
}

/// Errors raised while constructing an [`Event`](crate::Event).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// The payload does not match what the event kind carries.
    #[error("Invalid payload for {kind:?}: {reason}")]
    InvalidPayload {
        /// The kind being constructed.
        kind: EventKind,
        /// What was wrong with the payload.
        reason: String,
    },
    /// The source element kind may not emit this event kind.
    #[error("{kind:?} cannot be emitted by a {element:?}")]
    NotApplicable {
        /// The kind being constructed.
        kind: EventKind,
        /// The kind of the source element.
        element: ElementKind,
    },
    /// The factory has not been wired for this kind.
    #[error("Event kind {0:?} is not supported by this factory")]
    UnsupportedKind(EventKind),
    /// A before/apply/after sequence was requested for a kind with no after
    /// pairing.
    #[error("Event kind {0:?} is not vetoable and has no after kind")]
    NotVetoable(EventKind),
}

impl EventError {
    /// Create a payload error.
    pub fn invalid_payload(kind: EventKind, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind,
            reason: reason.into(),
        }
    }
}

/// Worker pool errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool has been shut down and accepts no further work.
    #[error("Worker pool has been shut down")]
    ShutDown,
    /// Failed to create the underlying thread pool.
    #[error("Failed to create worker pool: {0}")]
    CreationFailed(String),
}

/// A specialized Result type for core event operations.
pub type Result<T> = std::result::Result<T, EventError>;
