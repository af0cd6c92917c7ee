//! Directory of live conversations.
//!
//! The map sits behind a short synchronous lock that is never held across an
//! await. Each conversation has its own async lock; the lock order is
//! conversation first, map second. Because a conversation is removed from the
//! map in the same critical section that terminates it, every conversation
//! reachable through the map has at least one occupant.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tete_core::ids::allocate_id;
use tete_core::{ConnectionId, ConversationId, IdNamespace, MessageId, RelayError, Result};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::connection::{Connection, Listener};
use super::conversation::{Conversation, Slot};
use super::keepalive::run_keepalive;
use crate::config::RelayConfig;
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONVERSATIONS_ACTIVE, CONVERSATIONS_CREATED_TOTAL,
    CONVERSATIONS_TERMINATED_TOTAL, MESSAGES_READ_TOTAL, MESSAGES_STORED_TOTAL,
};

type SharedConversation = Arc<tokio::sync::Mutex<Conversation>>;

/// Registry of live conversations.
pub struct ConversationRegistry {
    conversations: Mutex<HashMap<ConversationId, SharedConversation>>,
    config: RelayConfig,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    connections: AtomicUsize,
}

impl ConversationRegistry {
    /// Create an empty registry.
    ///
    /// Every connection stop signal and keepalive token handed out is a child
    /// of `shutdown`.
    pub fn new(config: RelayConfig, shutdown: CancellationToken) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            config,
            shutdown,
            tasks: TaskTracker::new(),
            connections: AtomicUsize::new(0),
        }
    }

    /// Registry settings.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Create a party wired to this registry's shutdown signal.
    pub fn attach(&self, origin: &str) -> (Connection, Listener) {
        Connection::attach(
            origin,
            self.config.mailbox_capacity,
            self.shutdown.child_token(),
        )
    }

    /// Open a conversation with `creator` in the first slot.
    ///
    /// The creator's mailbox receives the conversation link first, then the
    /// keepalive starts.
    pub fn create(&self, creator: Connection) -> Result<ConversationId> {
        let keepalive = self.shutdown.child_token();
        let connection_id = creator.id();
        let origin = creator.origin().to_owned();

        let (id, shared) = {
            let mut map = self.conversations.lock();
            let id = ConversationId::from(allocate_id(
                IdNamespace::Conversation,
                b"",
                self.config.id_attempts,
                |candidate| map.contains_key(candidate),
            )?);
            let conversation = Conversation::new(
                id.clone(),
                creator,
                self.config.links.clone(),
                self.config.id_attempts,
                keepalive.clone(),
            );
            let shared = Arc::new(tokio::sync::Mutex::new(conversation));
            let _ = map.insert(id.clone(), Arc::clone(&shared));
            set_gauge(CONVERSATIONS_ACTIVE, map.len());
            (id, shared)
        };

        let weak = Arc::downgrade(&shared);
        let interval = self.config.keepalive_interval;
        let conversation_id = id.clone();
        let _ = self.tasks.spawn(async move {
            let result = run_keepalive(weak, interval, keepalive).await;
            debug!(%conversation_id, ?result, "keepalive finished");
            result
        });

        self.occupant_added();
        counter!(CONVERSATIONS_CREATED_TOTAL).increment(1);
        info!(conversation_id = %id, %connection_id, %origin, "conversation created");
        Ok(id)
    }

    /// Whether a conversation with this id is live.
    pub fn exists(&self, id: &ConversationId) -> bool {
        self.conversations.lock().contains_key(id)
    }

    /// Whether both slots are taken. Unknown ids are not full.
    pub async fn is_full(&self, id: &ConversationId) -> bool {
        match self.lookup(id) {
            Some(conversation) => conversation.lock().await.is_full(),
            None => false,
        }
    }

    /// Seat `joiner` in a live conversation.
    pub async fn join(&self, id: &ConversationId, joiner: Connection) -> Result<Slot> {
        let conversation = self
            .lookup(id)
            .ok_or_else(|| RelayError::ConversationNotFound(id.clone()))?;
        let mut conversation = conversation.lock().await;
        if conversation.is_terminated() {
            return Err(RelayError::ConversationNotFound(id.clone()));
        }
        let slot = conversation.join(joiner).await?;
        self.occupant_added();
        Ok(slot)
    }

    /// Whether `origin` is one of the conversation's occupants.
    pub async fn authorize(&self, id: &ConversationId, origin: &str) -> bool {
        match self.lookup(id) {
            Some(conversation) => {
                let conversation = conversation.lock().await;
                !conversation.is_terminated() && conversation.is_authorized(origin)
            }
            None => false,
        }
    }

    /// Store a message written by `origin`.
    pub async fn add_message(
        &self,
        id: &ConversationId,
        data: Bytes,
        origin: &str,
    ) -> Result<MessageId> {
        let conversation = self.live(id, origin)?;
        let mut conversation = conversation.lock().await;
        Self::check_authorized(&conversation, origin)?;
        let message = conversation.add_message(data, origin).await?;
        counter!(MESSAGES_STORED_TOTAL).increment(1);
        Ok(message)
    }

    /// Fetch and remove a message on behalf of `origin`.
    pub async fn read_message(
        &self,
        id: &ConversationId,
        message: &MessageId,
        origin: &str,
    ) -> Result<Bytes> {
        let conversation = self.live(id, origin)?;
        let mut conversation = conversation.lock().await;
        Self::check_authorized(&conversation, origin)?;
        let data = conversation.read_message(message).await?;
        counter!(MESSAGES_READ_TOTAL).increment(1);
        Ok(data)
    }

    /// Take `connection` out of its conversation.
    ///
    /// Returns `true` when this emptied the conversation, in which case it has
    /// been removed from the registry and its keepalive cancelled. Unknown
    /// conversations and connections are ignored.
    pub async fn remove_connection(&self, id: &ConversationId, connection: ConnectionId) -> bool {
        let Some(shared) = self.lookup(id) else {
            debug!(conversation_id = %id, %connection, "departure from unknown conversation");
            return false;
        };
        let mut conversation = shared.lock().await;
        let Some(slot) = conversation.slot_of(connection) else {
            debug!(conversation_id = %id, %connection, "departure of unknown connection");
            return false;
        };

        let terminated = conversation.leave(slot).await;
        self.occupant_removed();
        if terminated {
            let mut map = self.conversations.lock();
            if map.get(id).is_some_and(|current| Arc::ptr_eq(current, &shared)) {
                let _ = map.remove(id);
            }
            set_gauge(CONVERSATIONS_ACTIVE, map.len());
            counter!(CONVERSATIONS_TERMINATED_TOTAL).increment(1);
        }
        terminated
    }

    /// Number of live conversations.
    pub fn conversation_count(&self) -> usize {
        self.conversations.lock().len()
    }

    /// Number of parties seated in live conversations.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Occupied slots of a conversation, `None` if unknown.
    pub async fn occupancy(&self, id: &ConversationId) -> Option<usize> {
        let conversation = self.lookup(id)?;
        let conversation = conversation.lock().await;
        Some(conversation.occupancy())
    }

    /// Stop every connection and keepalive, then empty the registry.
    ///
    /// Waits for the keepalive tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<_> = {
            let mut map = self.conversations.lock();
            map.drain().map(|(_, conversation)| conversation).collect()
        };
        info!(conversations = drained.len(), "closing conversations");
        for conversation in drained {
            conversation.lock().await.close();
        }
        self.connections.store(0, Ordering::Relaxed);
        set_gauge(CONVERSATIONS_ACTIVE, 0);
        set_gauge(CONNECTIONS_ACTIVE, 0);

        let _ = self.tasks.close();
        self.tasks.wait().await;
    }

    /// Whether [`shutdown`](Self::shutdown) has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn lookup(&self, id: &ConversationId) -> Option<SharedConversation> {
        self.conversations.lock().get(id).cloned()
    }

    fn live(&self, id: &ConversationId, origin: &str) -> Result<SharedConversation> {
        self.lookup(id).ok_or_else(|| {
            debug!(conversation_id = %id, %origin, "request for unknown conversation");
            RelayError::ConversationNotFound(id.clone())
        })
    }

    fn check_authorized(conversation: &Conversation, origin: &str) -> Result<()> {
        if conversation.is_terminated() {
            return Err(RelayError::ConversationNotFound(conversation.id().clone()));
        }
        if !conversation.is_authorized(origin) {
            warn!(conversation_id = %conversation.id(), %origin, "origin not authorized");
            return Err(RelayError::Unauthorized {
                conversation: conversation.id().clone(),
                origin: origin.to_owned(),
            });
        }
        Ok(())
    }

    fn occupant_added(&self) {
        let count = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        set_gauge(CONNECTIONS_ACTIVE, count);
    }

    fn occupant_removed(&self) {
        let previous = self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .unwrap_or(0);
        set_gauge(CONNECTIONS_ACTIVE, previous.saturating_sub(1));
    }
}

impl std::fmt::Debug for ConversationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationRegistry")
            .field("conversations", &self.conversation_count())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_precision_loss)]
fn set_gauge(name: &'static str, value: usize) {
    gauge!(name).set(value as f64);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
