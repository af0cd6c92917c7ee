//! Periodic keepalive broadcast for one conversation.

use std::sync::Weak;
use std::time::Duration;

use tete_core::Notification;
use tokio::sync::Mutex;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::conversation::Conversation;

/// Outcome of the keepalive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepaliveResult {
    /// The keepalive was cancelled externally.
    Cancelled,
    /// The conversation ended or was dropped.
    Terminated,
}

/// Broadcast a keepalive event every `interval` until cancelled.
///
/// The first event goes out one full `interval` after start. Each tick takes
/// the conversation lock, so a reader that is not draining its mailbox delays
/// the next tick rather than accumulating keepalives.
pub async fn run_keepalive(
    conversation: Weak<Mutex<Conversation>>,
    interval: Duration,
    cancel: CancellationToken,
) -> KeepaliveResult {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return KeepaliveResult::Cancelled,
            _ = ticker.tick() => {}
        }

        let Some(conversation) = conversation.upgrade() else {
            return KeepaliveResult::Terminated;
        };
        let guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return KeepaliveResult::Cancelled,
            guard = conversation.lock() => guard,
        };
        if guard.is_terminated() {
            return KeepaliveResult::Terminated;
        }
        if guard.broadcast(&Notification::Keepalive).await.is_err() {
            return KeepaliveResult::Terminated;
        }
        debug!(conversation_id = %guard.id(), "keepalive sent");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use tete_core::{ConversationId, LinkBuilder};

    use super::*;
    use crate::relay::connection::{Connection, Listener};
    use crate::relay::conversation::Slot;

    fn make_conversation(token: &CancellationToken) -> (Arc<Mutex<Conversation>>, Listener) {
        let (conn, listener) = Connection::attach("10.0.0.1", 16, CancellationToken::new());
        let conv = Conversation::new(
            ConversationId::from("7"),
            conn,
            LinkBuilder::new("https://relay.example/"),
            3,
            token.clone(),
        );
        (Arc::new(Mutex::new(conv)), listener)
    }

    #[tokio::test]
    async fn keepalive_cancelled() {
        let cancel = CancellationToken::new();
        let (conv, _listener) = make_conversation(&cancel);
        let handle = tokio::spawn(run_keepalive(
            Arc::downgrade(&conv),
            Duration::from_secs(100),
            cancel.clone(),
        ));

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), KeepaliveResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn first_keepalive_after_one_interval() {
        let cancel = CancellationToken::new();
        let (conv, mut listener) = make_conversation(&cancel);
        let started = time::Instant::now();
        let _handle = tokio::spawn(run_keepalive(
            Arc::downgrade(&conv),
            Duration::from_secs(30),
            cancel.clone(),
        ));

        assert_eq!(
            listener.next_payload().await.unwrap(),
            Bytes::from(": https://relay.example/7\n")
        );
        assert_eq!(listener.next_payload().await.unwrap(), Bytes::from(".\n"));
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(listener.next_payload().await.unwrap(), Bytes::from(".\n"));
        assert!(started.elapsed() >= Duration::from_secs(60));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_conversation_stops_keepalive() {
        let cancel = CancellationToken::new();
        let (conv, _listener) = make_conversation(&CancellationToken::new());
        let handle = tokio::spawn(run_keepalive(
            Arc::downgrade(&conv),
            Duration::from_secs(30),
            cancel,
        ));

        assert!(conv.lock().await.leave(Slot::First).await);
        assert_eq!(handle.await.unwrap(), KeepaliveResult::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_conversation_stops_keepalive() {
        let cancel = CancellationToken::new();
        let (conv, _listener) = make_conversation(&cancel);
        let handle = tokio::spawn(run_keepalive(
            Arc::downgrade(&conv),
            Duration::from_secs(30),
            CancellationToken::new(),
        ));

        drop(conv);
        assert_eq!(handle.await.unwrap(), KeepaliveResult::Terminated);
    }

    #[test]
    fn keepalive_result_equality() {
        assert_eq!(KeepaliveResult::Cancelled, KeepaliveResult::Cancelled);
        assert_ne!(KeepaliveResult::Cancelled, KeepaliveResult::Terminated);
    }
}
