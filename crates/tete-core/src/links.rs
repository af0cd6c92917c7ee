//! Links printed in notifications.

use crate::ids::{ConversationId, MessageId};

/// Renders conversation and message links under a fixed base address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkBuilder {
    base: String,
}

impl LinkBuilder {
    /// Use `base` verbatim, adding a trailing `/` if missing.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self { base }
    }

    /// Derive the base from the public host name.
    ///
    /// The port is only spelled out for `localhost`; a real domain is assumed
    /// to sit behind a terminator on the scheme's default port.
    #[must_use]
    pub fn for_host(scheme: &str, domain: &str, port: u16) -> Self {
        if domain == "localhost" {
            Self::new(format!("{scheme}://{domain}:{port}/"))
        } else {
            Self::new(format!("{scheme}://{domain}/"))
        }
    }

    /// Base address, always ending in `/`.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Link to a conversation.
    #[must_use]
    pub fn conversation(&self, conversation: &ConversationId) -> String {
        format!("{}{conversation}", self.base)
    }

    /// Link to a message.
    #[must_use]
    pub fn message(&self, conversation: &ConversationId, message: &MessageId) -> String {
        format!("{}{conversation}/{message}", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_added_once() {
        assert_eq!(LinkBuilder::new("https://a.example").base(), "https://a.example/");
        assert_eq!(LinkBuilder::new("https://a.example/").base(), "https://a.example/");
    }

    #[test]
    fn localhost_keeps_port() {
        let links = LinkBuilder::for_host("https", "localhost", 8080);
        assert_eq!(links.base(), "https://localhost:8080/");
    }

    #[test]
    fn domain_drops_port() {
        let links = LinkBuilder::for_host("https", "relay.example", 8080);
        assert_eq!(links.base(), "https://relay.example/");
    }

    #[test]
    fn conversation_and_message_links() {
        let links = LinkBuilder::new("https://relay.example/");
        let conv = ConversationId::from("123");
        let msg = MessageId::from("456");
        assert_eq!(links.conversation(&conv), "https://relay.example/123");
        assert_eq!(links.message(&conv, &msg), "https://relay.example/123/456");
    }
}
