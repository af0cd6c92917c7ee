//! Relay error type.
//!
//! [`RelayError`] covers every failure a relay operation can report. The
//! classifiers decide how the HTTP boundary treats each one:
//!
//! - [`RelayError::is_silent`]: existence and authorization failures are
//!   answered with an empty success so outsiders learn nothing
//! - [`RelayError::is_retryable`]: transient conditions worth a client retry
//! - [`RelayError::severity`]: the log level the boundary should use

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ConversationId, MessageId};

/// Result alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Which id namespace an allocation was made in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdNamespace {
    /// Conversation ids, unique within the registry.
    Conversation,
    /// Message ids, unique within one conversation.
    Message,
}

impl fmt::Display for IdNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Conversation => "conversation",
            Self::Message => "message",
        })
    }
}

/// How loudly a failure should be reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Expected outcome of normal use.
    Expected,
    /// Temporary; the same request may succeed later.
    Transient,
    /// Indicates a logic or concurrency bug.
    Bug,
}

/// Failures of relay operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// No live conversation with this id.
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    /// The conversation holds no pending message with this id.
    #[error("message {message} not found in conversation {conversation}")]
    MessageNotFound {
        /// Conversation searched.
        conversation: ConversationId,
        /// Message requested.
        message: MessageId,
    },

    /// The requesting origin is not one of the conversation's occupants.
    #[error("origin {origin} is not a participant of conversation {conversation}")]
    Unauthorized {
        /// Conversation targeted.
        conversation: ConversationId,
        /// Origin that was refused.
        origin: String,
    },

    /// Every generated id candidate was already in use.
    #[error("{namespace} id {id} already in use")]
    IdCollision {
        /// Namespace the id was allocated in.
        namespace: IdNamespace,
        /// Last rejected candidate.
        id: String,
    },

    /// A join reached a conversation whose occupancy does not allow it.
    #[error("conversation {conversation}: {detail}")]
    StructuralInvariantViolation {
        /// Conversation involved.
        conversation: ConversationId,
        /// What was found.
        detail: &'static str,
    },

    /// A broadcast found no occupant to deliver to.
    #[error("conversation {0} has no occupants")]
    EmptyConversation(ConversationId),

    /// The wall clock could not be serialized for id generation.
    #[error("wall clock reading cannot be serialized")]
    Clock,
}

impl RelayError {
    /// Machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConversationNotFound(_) | Self::MessageNotFound { .. } => "NOT_FOUND",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::IdCollision { .. } => "ID_COLLISION",
            Self::StructuralInvariantViolation { .. } => "INVARIANT_VIOLATION",
            Self::EmptyConversation(_) => "EMPTY_CONVERSATION",
            Self::Clock => "CLOCK_ERROR",
        }
    }

    /// Severity for logging.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::ConversationNotFound(_)
            | Self::MessageNotFound { .. }
            | Self::Unauthorized { .. } => Severity::Expected,
            Self::IdCollision { .. } | Self::Clock => Severity::Transient,
            Self::StructuralInvariantViolation { .. } | Self::EmptyConversation(_) => {
                Severity::Bug
            }
        }
    }

    /// Whether a client may retry the same request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.severity() == Severity::Transient
    }

    /// Whether the boundary must answer as if nothing happened.
    ///
    /// Unknown ids and foreign origins look identical from outside.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::ConversationNotFound(_) | Self::MessageNotFound { .. } | Self::Unauthorized { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
