//! # tete-core
//!
//! Shared vocabulary for the tete relay.
//!
//! - **IDs**: short FNV-derived [`ConversationId`] / [`MessageId`] tokens and
//!   time-ordered [`ConnectionId`]s, plus the collision-retry allocator
//! - **Events**: the one-line [`Notification`] framing streamed to clients
//! - **Links**: [`LinkBuilder`] rendering the addresses printed in events
//! - **Errors**: [`RelayError`] via `thiserror`, with classification helpers
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod links;
pub mod logging;

pub use errors::{IdNamespace, RelayError, Result, Severity};
pub use events::Notification;
pub use ids::{ConnectionId, ConversationId, MessageId};
pub use links::LinkBuilder;
