//! Identifier newtypes and short-id generation.
//!
//! Conversation and message ids are the decimal rendering of a 32-bit FNV-1a
//! hash over the current wall-clock timestamp followed by a caller-supplied
//! salt. They are short enough to type into a terminal and carry no
//! cryptographic strength: every fresh id is checked against the namespace it
//! will live in, see [`allocate_id`].
//!
//! Connection ids never leave the process and are UUID v7.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{IdNamespace, RelayError, Result};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

macro_rules! short_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

short_id! {
    /// Token identifying a conversation in links and request paths.
    ConversationId
}

short_id! {
    /// Token identifying a pending message within its conversation.
    MessageId
}

/// Process-local identity of one attached party.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Fresh time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0.simple())
    }
}

/// 32-bit FNV-1a.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Generate an id from the current time and `salt`.
///
/// Fails only when the clock reading cannot be serialized, which is a
/// transient environment fault rather than a property of the request.
pub fn new_id(salt: &[u8]) -> Result<String> {
    new_id_at(Utc::now(), salt)
}

/// Generate an id from an explicit timestamp and `salt`.
pub fn new_id_at(now: DateTime<Utc>, salt: &[u8]) -> Result<String> {
    let nanos = now.timestamp_nanos_opt().ok_or(RelayError::Clock)?;
    let mut input = Vec::with_capacity(16 + salt.len());
    input.extend_from_slice(&nanos.to_be_bytes());
    input.extend_from_slice(salt);
    Ok(fnv1a_32(&input).to_string())
}

/// Generate an id that `is_taken` does not reject.
///
/// The first attempt uses `salt` as given; each retry appends the attempt
/// number so a repeated timestamp still yields a different hash. After
/// `attempts` rejected candidates the last one is reported as an
/// [`RelayError::IdCollision`].
pub fn allocate_id(
    namespace: IdNamespace,
    salt: &[u8],
    attempts: u32,
    mut is_taken: impl FnMut(&str) -> bool,
) -> Result<String> {
    let mut last = None;
    for attempt in 0..attempts.max(1) {
        let candidate = if attempt == 0 {
            new_id(salt)?
        } else {
            let mut salted = salt.to_vec();
            salted.extend_from_slice(&attempt.to_be_bytes());
            new_id(&salted)?
        };
        if !is_taken(&candidate) {
            return Ok(candidate);
        }
        tracing::debug!(%namespace, id = %candidate, attempt, "id collision, retrying");
        last = Some(candidate);
    }
    Err(RelayError::IdCollision {
        namespace,
        id: last.unwrap_or_default(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    #[test]
    fn fnv_known_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn id_is_decimal() {
        let id = new_id(b"salt").unwrap();
        assert!(!id.is_empty());
        assert!(id.chars().all(|c| c.is_ascii_digit()));
        assert!(id.parse::<u32>().is_ok());
    }

    #[test]
    fn same_instant_and_salt_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(new_id_at(at, b"x").unwrap(), new_id_at(at, b"x").unwrap());
    }

    #[test]
    fn salt_changes_id() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_ne!(new_id_at(at, b"hi").unwrap(), new_id_at(at, b"ho").unwrap());
    }

    #[test]
    fn instant_changes_id() {
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 1).unwrap();
        assert_ne!(new_id_at(a, b"").unwrap(), new_id_at(b, b"").unwrap());
    }

    #[test]
    fn unserializable_clock_is_reported() {
        let far = Utc.with_ymd_and_hms(3000, 1, 1, 0, 0, 0).unwrap();
        assert_matches!(new_id_at(far, b""), Err(RelayError::Clock));
    }

    #[test]
    fn allocate_returns_first_free_candidate() {
        let id = allocate_id(IdNamespace::Conversation, b"", 3, |_| false).unwrap();
        assert!(id.parse::<u32>().is_ok());
    }

    #[test]
    fn allocate_retries_after_collision() {
        let mut seen = Vec::new();
        let id = allocate_id(IdNamespace::Message, b"data", 3, |candidate| {
            seen.push(candidate.to_owned());
            seen.len() == 1
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], id);
    }

    #[test]
    fn allocate_gives_up_after_attempts() {
        let mut calls = 0;
        let err = allocate_id(IdNamespace::Message, b"data", 4, |_| {
            calls += 1;
            true
        })
        .unwrap_err();
        assert_eq!(calls, 4);
        assert_matches!(
            err,
            RelayError::IdCollision { namespace: IdNamespace::Message, .. }
        );
    }

    #[test]
    fn allocate_with_zero_attempts_still_tries_once() {
        let mut calls = 0;
        let _ = allocate_id(IdNamespace::Conversation, b"", 0, |_| {
            calls += 1;
            false
        })
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn short_id_display_and_deref() {
        let id = ConversationId::from("12345");
        assert_eq!(id.to_string(), "12345");
        assert_eq!(&*id, "12345");
        assert_eq!(id.as_str(), "12345");
    }

    #[test]
    fn short_id_serializes_transparently() {
        let id = MessageId::from("42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
        assert!(ConnectionId::new().to_string().starts_with("conn_"));
    }
}
