//! A two-party conversation: its slots and pending messages.
//!
//! Every method expects the caller to hold the conversation's lock, which the
//! `&mut self` receivers make explicit. Notifications are pushed into the
//! occupants' mailboxes while that lock is held, so each occupant observes the
//! conversation's events in lock-acquisition order.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use tete_core::ids::allocate_id;
use tete_core::{
    ConnectionId, ConversationId, IdNamespace, LinkBuilder, MessageId, Notification, RelayError,
    Result,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::connection::Connection;

/// One of the two occupancy positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Held by the creator.
    First,
    /// Held by the party that joined.
    Second,
}

impl Slot {
    /// Both slots in order.
    pub const ALL: [Self; 2] = [Self::First, Self::Second];

    /// The opposite slot.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Ordered pair of optional occupants.
#[derive(Debug, Default)]
pub struct Slots([Option<Connection>; 2]);

impl Slots {
    /// Occupant of `slot`, if any.
    pub fn get(&self, slot: Slot) -> Option<&Connection> {
        self.0[slot.index()].as_ref()
    }

    /// Occupied slots with their occupants.
    pub fn occupied(&self) -> impl Iterator<Item = (Slot, &Connection)> {
        Slot::ALL
            .into_iter()
            .filter_map(|slot| self.get(slot).map(|conn| (slot, conn)))
    }

    /// Number of occupied slots.
    pub fn occupancy(&self) -> usize {
        self.0.iter().filter(|s| s.is_some()).count()
    }

    /// Whether both slots are occupied.
    pub fn is_full(&self) -> bool {
        self.occupancy() == 2
    }

    /// Whether both slots are empty.
    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    fn put(&mut self, slot: Slot, connection: Connection) {
        self.0[slot.index()] = Some(connection);
    }

    fn take(&mut self, slot: Slot) -> Option<Connection> {
        self.0[slot.index()].take()
    }
}

/// Live state of one conversation.
#[derive(Debug)]
pub struct Conversation {
    id: ConversationId,
    slots: Slots,
    messages: HashMap<MessageId, Bytes>,
    keepalive: CancellationToken,
    terminated: bool,
    links: LinkBuilder,
    id_attempts: u32,
}

impl Conversation {
    /// Open a conversation with `creator` in the first slot.
    ///
    /// The creator's fresh mailbox receives the conversation link before
    /// anything else can reach it.
    pub fn new(
        id: ConversationId,
        creator: Connection,
        links: LinkBuilder,
        id_attempts: u32,
        keepalive: CancellationToken,
    ) -> Self {
        let _ = creator.greet(&Notification::Created {
            link: links.conversation(&id),
        });
        let mut slots = Slots::default();
        slots.put(Slot::First, creator);
        Self {
            id,
            slots,
            messages: HashMap::new(),
            keepalive,
            terminated: false,
            links,
            id_attempts,
        }
    }

    /// Conversation ID.
    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Number of occupied slots.
    pub fn occupancy(&self) -> usize {
        self.slots.occupancy()
    }

    /// Whether both slots are taken.
    pub fn is_full(&self) -> bool {
        self.slots.is_full()
    }

    /// Whether both parties have left.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Number of messages not yet read.
    pub fn pending_messages(&self) -> usize {
        self.messages.len()
    }

    /// Token cancelling this conversation's keepalive task.
    pub fn keepalive_token(&self) -> &CancellationToken {
        &self.keepalive
    }

    /// Whether `origin` is one of the occupants.
    pub fn is_authorized(&self, origin: &str) -> bool {
        self.slots.occupied().any(|(_, conn)| conn.origin() == origin)
    }

    /// Slot held by the given connection.
    pub fn slot_of(&self, connection: ConnectionId) -> Option<Slot> {
        self.slots
            .occupied()
            .find(|(_, conn)| conn.id() == connection)
            .map(|(slot, _)| slot)
    }

    /// Seat `joiner` in the free slot.
    ///
    /// The joiner is greeted with the present party's origin; the present
    /// party is told the joiner's origin. Exactly one slot must be occupied.
    ///
    /// The joiner is seated only after the present party has been notified,
    /// so a join abandoned while that send waits leaves the conversation
    /// untouched.
    pub async fn join(&mut self, joiner: Connection) -> Result<Slot> {
        let (present_slot, present) = match self.slots.occupancy() {
            1 => self
                .slots
                .occupied()
                .next()
                .map(|(slot, conn)| (slot, conn.clone()))
                .ok_or_else(|| self.violation("occupied slot vanished"))?,
            0 => return Err(self.violation("join on unoccupied conversation")),
            _ => return Err(self.violation("both slots occupied")),
        };
        let slot = present_slot.other();

        let _ = joiner.greet(&Notification::Joined {
            origin: present.origin().to_owned(),
        });
        let joined = Notification::Joined {
            origin: joiner.origin().to_owned(),
        };
        let _ = present.send(&joined).await;
        info!(
            conversation_id = %self.id,
            connection_id = %joiner.id(),
            origin = joiner.origin(),
            %slot,
            "party joined"
        );
        self.slots.put(slot, joiner);
        Ok(slot)
    }

    /// Deliver `notification` to every occupant.
    pub async fn broadcast(&self, notification: &Notification) -> Result<()> {
        if self.slots.is_empty() {
            return Err(RelayError::EmptyConversation(self.id.clone()));
        }
        for (slot, conn) in self.slots.occupied() {
            if !conn.send(notification).await {
                debug!(conversation_id = %self.id, %slot, "occupant no longer listening");
            }
        }
        Ok(())
    }

    /// Store `data` as a new message written by `origin`.
    ///
    /// Occupants sharing the writer's origin see the message marked as their
    /// own; the others see it as coming from the peer.
    pub async fn add_message(&mut self, data: Bytes, origin: &str) -> Result<MessageId> {
        let messages = &self.messages;
        let id = MessageId::from(allocate_id(
            IdNamespace::Message,
            &data,
            self.id_attempts,
            |candidate| messages.contains_key(candidate),
        )?);
        let link = self.links.message(&self.id, &id);
        debug!(conversation_id = %self.id, message_id = %id, len = data.len(), "message stored");
        let _ = self.messages.insert(id.clone(), data);

        for (slot, conn) in self.slots.occupied() {
            let notification = if conn.origin() == origin {
                Notification::MessageFromSelf { link: link.clone() }
            } else {
                Notification::MessageFromPeer { link: link.clone() }
            };
            if !conn.send(&notification).await {
                debug!(conversation_id = %self.id, %slot, "occupant no longer listening");
            }
        }
        Ok(id)
    }

    /// Remove and return a message, announcing that it was read.
    pub async fn read_message(&mut self, id: &MessageId) -> Result<Bytes> {
        let data = self
            .messages
            .remove(id)
            .ok_or_else(|| RelayError::MessageNotFound {
                conversation: self.id.clone(),
                message: id.clone(),
            })?;
        debug!(conversation_id = %self.id, message_id = %id, "message read");
        self.broadcast(&Notification::MessageRead {
            link: self.links.message(&self.id, id),
        })
        .await?;
        Ok(data)
    }

    /// Empty `slot`. Returns `true` when that left the conversation empty.
    ///
    /// On termination the keepalive is cancelled and pending messages are
    /// dropped; otherwise the remaining party is told who left.
    pub async fn leave(&mut self, slot: Slot) -> bool {
        let Some(departed) = self.slots.take(slot) else {
            return self.terminated;
        };
        info!(
            conversation_id = %self.id,
            connection_id = %departed.id(),
            origin = departed.origin(),
            %slot,
            "party left"
        );

        if self.slots.is_empty() {
            self.terminate();
            return true;
        }
        if let Some(remaining) = self.slots.get(slot.other()) {
            let _ = remaining
                .send(&Notification::Left {
                    origin: departed.origin().to_owned(),
                })
                .await;
        }
        false
    }

    /// Stop every occupant and the keepalive without notifying anyone.
    pub fn close(&mut self) {
        for (_, conn) in self.slots.occupied() {
            conn.stop();
        }
        self.terminate();
    }

    fn terminate(&mut self) {
        if !self.terminated {
            self.terminated = true;
            self.keepalive.cancel();
            self.messages.clear();
            info!(conversation_id = %self.id, "conversation terminated");
        }
    }

    fn violation(&self, detail: &'static str) -> RelayError {
        RelayError::StructuralInvariantViolation {
            conversation: self.id.clone(),
            detail,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::relay::connection::Listener;

    const BASE: &str = "https://relay.example/";

    fn party(origin: &str) -> (Connection, Listener) {
        Connection::attach(origin, 16, CancellationToken::new())
    }

    fn open(creator: Connection) -> Conversation {
        Conversation::new(
            ConversationId::from("100"),
            creator,
            LinkBuilder::new(BASE),
            3,
            CancellationToken::new(),
        )
    }

    async fn next_line(listener: &mut Listener) -> String {
        let payload = listener.next_payload().await.unwrap();
        String::from_utf8(payload.to_vec()).unwrap()
    }

    #[test]
    fn slot_other_is_symmetric() {
        assert_eq!(Slot::First.other(), Slot::Second);
        assert_eq!(Slot::Second.other(), Slot::First);
        assert_eq!(Slot::First.to_string(), "0");
        assert_eq!(Slot::Second.to_string(), "1");
    }

    #[tokio::test]
    async fn creator_is_greeted_with_link() {
        let (a, mut la) = party("10.0.0.1");
        let conv = open(a);
        assert_eq!(conv.occupancy(), 1);
        assert!(!conv.is_full());
        assert_eq!(next_line(&mut la).await, ": https://relay.example/100\n");
    }

    #[tokio::test]
    async fn join_notifies_both_sides() {
        let (a, mut la) = party("10.0.0.1");
        let (b, mut lb) = party("10.0.0.2");
        let mut conv = open(a);

        let slot = conv.join(b).await.unwrap();
        assert_eq!(slot, Slot::Second);
        assert!(conv.is_full());

        assert_eq!(next_line(&mut la).await, ": https://relay.example/100\n");
        assert_eq!(next_line(&mut la).await, "> 10.0.0.2\n");
        assert_eq!(next_line(&mut lb).await, "> 10.0.0.1\n");
    }

    #[tokio::test]
    async fn join_on_full_conversation_is_violation() {
        let (a, _la) = party("10.0.0.1");
        let (b, _lb) = party("10.0.0.2");
        let (c, _lc) = party("10.0.0.3");
        let mut conv = open(a);
        let _ = conv.join(b).await.unwrap();

        let err = conv.join(c).await.unwrap_err();
        assert_matches!(
            err,
            RelayError::StructuralInvariantViolation { detail: "both slots occupied", .. }
        );
        assert!(!conv.is_authorized("10.0.0.3"));
    }

    #[tokio::test]
    async fn join_on_empty_conversation_is_violation() {
        let (a, _la) = party("10.0.0.1");
        let (b, _lb) = party("10.0.0.2");
        let mut conv = open(a);
        assert!(conv.leave(Slot::First).await);

        let err = conv.join(b).await.unwrap_err();
        assert_matches!(err, RelayError::StructuralInvariantViolation { .. });
    }

    #[tokio::test]
    async fn rejoin_takes_vacated_first_slot() {
        let (a, _la) = party("10.0.0.1");
        let (b, _lb) = party("10.0.0.2");
        let (c, _lc) = party("10.0.0.3");
        let mut conv = open(a);
        let _ = conv.join(b).await.unwrap();
        assert!(!conv.leave(Slot::First).await);

        assert_eq!(conv.join(c).await.unwrap(), Slot::First);
    }

    #[tokio::test]
    async fn abandoned_join_leaves_conversation_untouched() {
        let (a, _la) = Connection::attach("10.0.0.1", 1, CancellationToken::new());
        let (b, _lb) = party("10.0.0.2");
        let mut conv = open(a);

        // The creator's greeting fills its mailbox, so notifying it blocks.
        let pending = tokio::time::timeout(Duration::from_millis(50), conv.join(b)).await;
        assert!(pending.is_err());
        assert_eq!(conv.occupancy(), 1);
        assert!(!conv.is_authorized("10.0.0.2"));

        assert!(conv.leave(Slot::First).await);
        assert!(conv.is_terminated());
    }

    #[tokio::test]
    async fn message_marked_by_origin() {
        let (a, mut la) = party("10.0.0.1");
        let (b, mut lb) = party("10.0.0.2");
        let mut conv = open(a);
        let _ = conv.join(b).await.unwrap();
        let _ = next_line(&mut la).await;
        let _ = next_line(&mut la).await;
        let _ = next_line(&mut lb).await;

        let id = conv
            .add_message(Bytes::from_static(b"hi"), "10.0.0.2")
            .await
            .unwrap();
        assert!(id.parse::<u32>().is_ok());
        let link = format!("https://relay.example/100/{id}");
        assert_eq!(next_line(&mut la).await, format!("+ {link}\n"));
        assert_eq!(next_line(&mut lb).await, format!("  {link}\n"));
        assert_eq!(conv.pending_messages(), 1);
    }

    #[tokio::test]
    async fn read_once_then_not_found() {
        let (a, mut la) = party("10.0.0.1");
        let mut conv = open(a);
        let _ = next_line(&mut la).await;

        let id = conv
            .add_message(Bytes::from_static(b"secret"), "10.0.0.1")
            .await
            .unwrap();
        let _ = next_line(&mut la).await;

        let data = conv.read_message(&id).await.unwrap();
        assert_eq!(data, Bytes::from_static(b"secret"));
        assert_eq!(
            next_line(&mut la).await,
            format!("- https://relay.example/100/{id}\n")
        );

        let err = conv.read_message(&id).await.unwrap_err();
        assert_matches!(err, RelayError::MessageNotFound { .. });
        assert_eq!(conv.pending_messages(), 0);
    }

    #[tokio::test]
    async fn leave_notifies_remaining_party() {
        let (a, mut la) = party("10.0.0.1");
        let (b, _lb) = party("10.0.0.2");
        let mut conv = open(a);
        let _ = conv.join(b).await.unwrap();
        let _ = next_line(&mut la).await;
        let _ = next_line(&mut la).await;

        assert!(!conv.leave(Slot::Second).await);
        assert_eq!(next_line(&mut la).await, "< 10.0.0.2\n");
        assert!(!conv.is_terminated());
        assert!(conv.is_authorized("10.0.0.1"));
        assert!(!conv.is_authorized("10.0.0.2"));
    }

    #[tokio::test]
    async fn last_leave_terminates_and_cancels_keepalive() {
        let (a, _la) = party("10.0.0.1");
        let mut conv = open(a);
        let token = conv.keepalive_token().clone();

        assert!(conv.leave(Slot::First).await);
        assert!(conv.is_terminated());
        assert!(token.is_cancelled());
        assert_eq!(conv.occupancy(), 0);
    }

    #[tokio::test]
    async fn leave_of_empty_slot_changes_nothing() {
        let (a, _la) = party("10.0.0.1");
        let mut conv = open(a);
        assert!(!conv.leave(Slot::Second).await);
        assert_eq!(conv.occupancy(), 1);
    }

    #[tokio::test]
    async fn broadcast_on_empty_conversation_fails() {
        let (a, _la) = party("10.0.0.1");
        let mut conv = open(a);
        let _ = conv.leave(Slot::First).await;
        let err = conv.broadcast(&Notification::Keepalive).await.unwrap_err();
        assert_matches!(err, RelayError::EmptyConversation(_));
    }

    #[tokio::test]
    async fn slot_of_finds_connection() {
        let (a, _la) = party("10.0.0.1");
        let a_id = a.id();
        let conv = open(a);
        assert_eq!(conv.slot_of(a_id), Some(Slot::First));
        assert_eq!(conv.slot_of(ConnectionId::new()), None);
    }

    #[tokio::test]
    async fn close_stops_occupants() {
        let (a, _la) = party("10.0.0.1");
        let handle = a.clone();
        let mut conv = open(a);
        conv.close();
        assert!(handle.is_stopped());
        assert!(conv.is_terminated());
        assert!(conv.keepalive_token().is_cancelled());
    }
}
