//! Conversations, their parties, and the registry holding them.

pub mod connection;
pub mod conversation;
pub mod keepalive;
pub mod registry;

pub use connection::{Connection, Departure, EventStream, Listener};
pub use conversation::{Conversation, Slot, Slots};
pub use keepalive::{KeepaliveResult, run_keepalive};
pub use registry::ConversationRegistry;
