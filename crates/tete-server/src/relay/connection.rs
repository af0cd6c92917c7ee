//! One attached party: its mailbox and its streaming loop.
//!
//! [`Connection::attach`] splits a party into two halves. The [`Connection`]
//! half is cheap to clone and lives in a conversation slot; producers push
//! notifications through it. The [`Listener`] half owns the receiving end of
//! the mailbox and is consumed by [`Listener::listen`], which turns it into
//! the response body stream.
//!
//! The mailbox is a bounded channel (capacity 1 by default), so a producer
//! waits until the reader has taken the previous payload. A slow client
//! therefore stalls delivery to itself instead of growing a buffer.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use tete_core::{ConnectionId, ConversationId, Notification};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::registry::ConversationRegistry;

/// Response body stream produced by [`Listener::listen`].
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Bytes, Infallible>> + Send>>;

/// Producer-side handle of an attached party.
#[derive(Clone, Debug)]
pub struct Connection {
    id: ConnectionId,
    origin: Arc<str>,
    mailbox: mpsc::Sender<Bytes>,
    stop: CancellationToken,
}

impl Connection {
    /// Create both halves of a new party.
    ///
    /// `stop` is the party's one-shot stop signal; pass a child of a wider
    /// token to have it raised together with that token.
    pub fn attach(
        origin: impl Into<Arc<str>>,
        capacity: usize,
        stop: CancellationToken,
    ) -> (Self, Listener) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = ConnectionId::new();
        let connection = Self {
            id,
            origin: origin.into(),
            mailbox: tx,
            stop: stop.clone(),
        };
        let listener = Listener {
            id,
            receiver: rx,
            stop,
        };
        (connection, listener)
    }

    /// Connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Network origin of the party.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Enqueue a notification, waiting for mailbox room.
    ///
    /// Returns `false` without waiting further once the listener is gone or
    /// the stop signal is raised.
    pub async fn send(&self, notification: &Notification) -> bool {
        let payload = notification.encode();
        let delivered = tokio::select! {
            biased;
            () = self.stop.cancelled() => false,
            sent = self.mailbox.send(payload) => sent.is_ok(),
        };
        if !delivered {
            debug!(connection_id = %self.id, marker = %notification.marker(), "mailbox closed, notification dropped");
        }
        delivered
    }

    /// Enqueue a greeting into a mailbox nobody has written to yet.
    ///
    /// A fresh mailbox always has room for one payload, so this never waits.
    /// It is how the first event reaches a party before its loop starts.
    pub fn greet(&self, notification: &Notification) -> bool {
        match self.mailbox.try_send(notification.encode()) {
            Ok(()) => true,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "greeting not delivered");
                false
            }
        }
    }

    /// Raise the stop signal.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether the stop signal has been raised.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// Consumer-side half of an attached party.
#[derive(Debug)]
pub struct Listener {
    id: ConnectionId,
    receiver: mpsc::Receiver<Bytes>,
    stop: CancellationToken,
}

impl Listener {
    /// Connection ID shared with the [`Connection`] half.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next payload, or `None` once stopped or every producer is gone.
    pub async fn next_payload(&mut self) -> Option<Bytes> {
        tokio::select! {
            biased;
            () = self.stop.cancelled() => None,
            payload = self.receiver.recv() => payload,
        }
    }

    /// Run the streaming loop as a response body.
    ///
    /// Each mailbox payload becomes one body chunk, flushed as it is
    /// produced. The stream ends when the stop signal is raised. If the
    /// transport drops the stream first (client disconnect), the party is
    /// removed from its conversation through `departure` and the stop signal
    /// is raised afterwards. The mailbox closes when the stream is dropped,
    /// which is only after the stop signal has been observed or the client
    /// is gone; producers blocked on it are released with a failed send.
    pub fn listen(self, departure: Departure) -> EventStream {
        let guard = DepartureGuard {
            departure: Some(departure),
            stop: self.stop.clone(),
        };
        let state = (self, guard);
        Box::pin(futures::stream::unfold(state, |(mut listener, guard)| async move {
            let payload = listener.next_payload().await?;
            Some((Ok(payload), (listener, guard)))
        }))
    }
}

/// Where a party sits, so its loop can request its own removal.
#[derive(Clone)]
pub struct Departure {
    registry: Arc<ConversationRegistry>,
    conversation: ConversationId,
    connection: ConnectionId,
}

impl Departure {
    /// Back-reference from a party to its conversation.
    pub fn new(
        registry: Arc<ConversationRegistry>,
        conversation: ConversationId,
        connection: ConnectionId,
    ) -> Self {
        Self {
            registry,
            conversation,
            connection,
        }
    }
}

/// Requests removal when the streaming loop is torn down.
struct DepartureGuard {
    departure: Option<Departure>,
    stop: CancellationToken,
}

impl Drop for DepartureGuard {
    fn drop(&mut self) {
        let Some(departure) = self.departure.take() else {
            return;
        };
        let stop = self.stop.clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(conversation_id = %departure.conversation, "no runtime to process departure");
            stop.cancel();
            return;
        };
        drop(runtime.spawn(async move {
            let _ = departure
                .registry
                .remove_connection(&departure.conversation, departure.connection)
                .await;
            stop.cancel();
        }));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
