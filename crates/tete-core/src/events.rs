//! Event framing for the notification stream.
//!
//! Each event is one line: a single marker character, a space, and a payload
//! (an origin or a link). The keepalive event is the bare marker `.`.
//!
//! | Marker | Meaning                      | Payload |
//! |--------|------------------------------|---------|
//! | `:`    | conversation created         | link    |
//! | `>`    | party joined                 | origin  |
//! | `<`    | party left                   | origin  |
//! | `+`    | message from the other party | link    |
//! | ` `    | echo of your own message     | link    |
//! | `-`    | message read and removed     | link    |
//! | `.`    | keepalive                    | none    |

use bytes::Bytes;

/// One event delivered to an occupant's mailbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// The conversation was created; the link is what the peer should fetch.
    Created {
        /// Conversation link.
        link: String,
    },
    /// A party is (or already was) present on the other side.
    Joined {
        /// Origin of that party.
        origin: String,
    },
    /// The other party departed.
    Left {
        /// Origin of the departed party.
        origin: String,
    },
    /// The other party stored a new message.
    MessageFromPeer {
        /// Message link.
        link: String,
    },
    /// The recipient's own message was stored.
    MessageFromSelf {
        /// Message link.
        link: String,
    },
    /// A message was read and is gone.
    MessageRead {
        /// Link of the removed message.
        link: String,
    },
    /// No-op traffic keeping idle connections open.
    Keepalive,
}

impl Notification {
    /// Leading marker character.
    #[must_use]
    pub const fn marker(&self) -> char {
        match self {
            Self::Created { .. } => ':',
            Self::Joined { .. } => '>',
            Self::Left { .. } => '<',
            Self::MessageFromPeer { .. } => '+',
            Self::MessageFromSelf { .. } => ' ',
            Self::MessageRead { .. } => '-',
            Self::Keepalive => '.',
        }
    }

    /// Payload following the marker, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::Created { link }
            | Self::MessageFromPeer { link }
            | Self::MessageFromSelf { link }
            | Self::MessageRead { link } => Some(link),
            Self::Joined { origin } | Self::Left { origin } => Some(origin),
            Self::Keepalive => None,
        }
    }

    /// Render as a single line without the terminator.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self.payload() {
            Some(payload) => format!("{} {payload}", self.marker()),
            None => self.marker().to_string(),
        }
    }

    /// Wire form: the line plus its `\n` terminator.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut line = self.to_line();
        line.push('\n');
        Bytes::from(line)
    }

    /// Parse one line (terminator optional).
    ///
    /// Returns `None` for anything that is not a well-formed event.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        if line == "." {
            return Some(Self::Keepalive);
        }
        let mut chars = line.chars();
        let marker = chars.next()?;
        let payload = chars.as_str().strip_prefix(' ')?;
        if payload.is_empty() {
            return None;
        }
        let payload = payload.to_owned();
        match marker {
            ':' => Some(Self::Created { link: payload }),
            '>' => Some(Self::Joined { origin: payload }),
            '<' => Some(Self::Left { origin: payload }),
            '+' => Some(Self::MessageFromPeer { link: payload }),
            ' ' => Some(Self::MessageFromSelf { link: payload }),
            '-' => Some(Self::MessageRead { link: payload }),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_line() {
        let n = Notification::Created {
            link: "https://relay.example/123".into(),
        };
        assert_eq!(n.encode(), Bytes::from(": https://relay.example/123\n"));
    }

    #[test]
    fn self_echo_starts_with_two_spaces() {
        let n = Notification::MessageFromSelf {
            link: "https://relay.example/1/2".into(),
        };
        assert_eq!(n.to_line(), "  https://relay.example/1/2");
    }

    #[test]
    fn peer_message_line() {
        let n = Notification::MessageFromPeer {
            link: "https://relay.example/1/2".into(),
        };
        assert_eq!(n.to_line(), "+ https://relay.example/1/2");
    }

    #[test]
    fn join_and_leave_carry_origin() {
        assert_eq!(
            Notification::Joined { origin: "10.0.0.2".into() }.to_line(),
            "> 10.0.0.2"
        );
        assert_eq!(
            Notification::Left { origin: "10.0.0.2".into() }.to_line(),
            "< 10.0.0.2"
        );
    }

    #[test]
    fn keepalive_is_bare_dot() {
        assert_eq!(Notification::Keepalive.encode(), Bytes::from(".\n"));
        assert_eq!(Notification::Keepalive.payload(), None);
    }

    #[test]
    fn parse_recognises_every_marker() {
        let cases = [
            (": l", Notification::Created { link: "l".into() }),
            ("> o", Notification::Joined { origin: "o".into() }),
            ("< o", Notification::Left { origin: "o".into() }),
            ("+ l", Notification::MessageFromPeer { link: "l".into() }),
            ("  l", Notification::MessageFromSelf { link: "l".into() }),
            ("- l", Notification::MessageRead { link: "l".into() }),
            (".", Notification::Keepalive),
        ];
        for (line, expected) in cases {
            assert_eq!(Notification::parse(line), Some(expected), "line {line:?}");
        }
    }

    #[test]
    fn parse_accepts_terminator() {
        assert_eq!(
            Notification::parse("- https://x/1/2\n"),
            Some(Notification::MessageRead { link: "https://x/1/2".into() })
        );
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        assert_eq!(Notification::parse(""), None);
        assert_eq!(Notification::parse(":"), None);
        assert_eq!(Notification::parse(":nospace"), None);
        assert_eq!(Notification::parse("? what"), None);
        assert_eq!(Notification::parse(". "), None);
    }
}
