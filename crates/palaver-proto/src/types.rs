//! Shared data model for the presence and fan-out engine.
//!
//! These types cross the wire inside CBOR payloads and are also what the
//! store traits persist, so they live in the protocol crate where both the
//! engine and its collaborators can reach them.

use serde::{Deserialize, Serialize};

/// Stable user identifier.
pub type UserId = u64;

/// 128-bit conversation identifier (UUID).
pub type ConversationId = u128;

/// Server-assigned message identifier.
pub type MessageId = u64;

/// Server-assigned session identifier (one per live connection).
pub type SessionId = u64;

/// Public identity of an authenticated user.
///
/// The opaque id is the routing key; display fields ride along so fan-out
/// events can render a sender without a store round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Opaque stable identifier
    pub id: UserId,
    /// Display name
    pub username: String,
    /// Optional avatar URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Reference to an uploaded media attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Where the attachment is served from
    pub url: String,
    /// Original filename
    pub filename: String,
    /// MIME type
    pub file_type: String,
}

/// A persisted chat message with its delivery and read state.
///
/// # Invariants
///
/// - `delivered_to` and `read_by` are deduplicated append-only sets: entries
///   are never removed and never repeated. Mutation goes through
///   [`Self::mark_delivered`] / [`Self::mark_read`], which enforce this.
/// - `reaction` is a single last-write-wins field: one reaction per message,
///   any writer overwrites the previous value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Server-assigned identifier
    pub id: MessageId,
    /// Conversation this message belongs to
    pub conversation_id: ConversationId,
    /// Sender identity snapshot at submit time
    pub sender: UserIdentity,
    /// Text content (may be empty when media is attached)
    pub content: String,
    /// Optional media attachment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    /// Users whose live sessions have received the message
    pub delivered_to: Vec<UserId>,
    /// Users who have read the message
    pub read_by: Vec<UserId>,
    /// Last-write-wins reaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
    /// Server-stamped submit time (Unix seconds)
    pub sent_at_secs: u64,
}

impl MessageEnvelope {
    /// True if the message has neither text content nor media.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.media.is_none()
    }

    /// Append a user to `delivered_to` unless already present.
    ///
    /// Returns `true` if the set grew.
    pub fn mark_delivered(&mut self, user_id: UserId) -> bool {
        if self.delivered_to.contains(&user_id) {
            return false;
        }
        self.delivered_to.push(user_id);
        true
    }

    /// Append a user to `read_by` unless already present.
    ///
    /// Returns `true` if the set grew. Idempotent by construction.
    pub fn mark_read(&mut self, user_id: UserId) -> bool {
        if self.read_by.contains(&user_id) {
            return false;
        }
        self.read_by.push(user_id);
        true
    }

    /// Replace the reaction (last write wins).
    pub fn set_reaction(&mut self, reaction: impl Into<String>) {
        self.reaction = Some(reaction.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> MessageEnvelope {
        MessageEnvelope {
            id: 1,
            conversation_id: 0xC0FFEE,
            sender: UserIdentity { id: 10, username: "alice".to_string(), avatar: None },
            content: "hello".to_string(),
            media: None,
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            reaction: None,
            sent_at_secs: 1_700_000_000,
        }
    }

    #[test]
    fn mark_delivered_deduplicates() {
        let mut msg = envelope();

        assert!(msg.mark_delivered(20));
        assert!(!msg.mark_delivered(20));
        assert!(msg.mark_delivered(30));

        assert_eq!(msg.delivered_to, vec![20, 30]);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let mut msg = envelope();

        assert!(msg.mark_read(20));
        assert!(!msg.mark_read(20));
        assert_eq!(msg.read_by, vec![20]);
    }

    #[test]
    fn reaction_last_write_wins() {
        let mut msg = envelope();

        msg.set_reaction("👍");
        msg.set_reaction("❤️");
        assert_eq!(msg.reaction.as_deref(), Some("❤️"));
    }

    #[test]
    fn empty_detection() {
        let mut msg = envelope();
        assert!(!msg.is_empty());

        msg.content = "   ".to_string();
        assert!(msg.is_empty());

        msg.media = Some(MediaRef {
            url: "https://cdn.example/x.png".to_string(),
            filename: "x.png".to_string(),
            file_type: "image/png".to_string(),
        });
        assert!(!msg.is_empty());
    }

    #[test]
    fn envelope_cbor_round_trip() {
        let mut msg = envelope();
        msg.mark_delivered(20);
        msg.set_reaction("👍");

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&msg, &mut encoded).unwrap();

        let decoded: MessageEnvelope = ciborium::de::from_reader(&encoded[..]).unwrap();
        assert_eq!(msg, decoded);
    }
}
