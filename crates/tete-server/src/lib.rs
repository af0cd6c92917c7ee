//! # tete-server
//!
//! The relay itself: conversations, streaming connections, and the axum
//! surface exposing them.
//!
//! - **Relay**: [`ConversationRegistry`] with per-conversation locking,
//!   mailbox-backed [`relay::Connection`]s and periodic keepalives
//! - **Routes**: create/join/read/write handlers, `/health`, `/metrics`
//! - **Server**: [`RelayServer`] binding, serving and graceful shutdown
//! - **Config**: layered [`ServerConfig`] (defaults, JSON file, env vars)

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod routes;
pub mod server;
pub mod shutdown;

pub use config::{RelayConfig, ServerConfig};
pub use relay::ConversationRegistry;
pub use server::{AppState, RelayServer};
