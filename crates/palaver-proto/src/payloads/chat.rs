//! Channel membership and message payload types.
//!
//! These mirror the client-visible chat events: join acks, message submit
//! and its per-sender ack, fan-out of accepted messages, and delivery/read/
//! reaction updates.

use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MediaRef, MessageEnvelope, MessageId, UserId};

/// Subscribe to a conversation channel.
///
/// The conversation id rides in the frame header; this payload carries
/// nothing today but stays a struct for forward compatibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinChannel {}

/// Server acceptance of [`JoinChannel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAck {
    /// The conversation that was joined
    pub conversation_id: ConversationId,
}

/// Submit a new message to a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Text content (may be empty when media is attached)
    pub content: String,
    /// Optional media attachment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    /// Client-generated correlation id, echoed opaquely in the ack
    pub temp_id: String,
}

/// Per-sender acknowledgement of [`NewMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAck {
    /// Whether the message was accepted and persisted
    pub success: bool,
    /// Server-assigned id (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_id: Option<MessageId>,
    /// Echo of the client's correlation id
    pub temp_id: String,
    /// Failure description (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fan-out of an accepted message to the whole channel, sender included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceived {
    /// The persisted message
    pub envelope: MessageEnvelope,
}

/// Delivered-set update broadcast after fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelivered {
    /// The message whose delivered set changed
    pub message_id: MessageId,
    /// Complete deduplicated delivered set
    pub delivered_to: Vec<UserId>,
}

/// Mark a message as read by the sending session's user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkRead {
    /// The message being read
    pub message_id: MessageId,
}

/// Read-status update broadcast to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// The message whose read set is reported
    pub message_id: MessageId,
    /// Complete deduplicated read set
    pub read_by: Vec<UserId>,
}

/// Set the reaction on a message (last write wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct React {
    /// The message being reacted to
    pub message_id: MessageId,
    /// Reaction content (e.g. emoji)
    pub reaction: String,
}

/// Reaction update broadcast to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionUpdate {
    /// The message whose reaction changed
    pub message_id: MessageId,
    /// The new reaction value
    pub reaction: String,
    /// Who set it
    pub user_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ack_round_trip() {
        let ack = MessageAck {
            success: true,
            saved_id: Some(42),
            temp_id: "tmp-7".to_string(),
            error: None,
        };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&ack, &mut encoded).unwrap();
        let decoded: MessageAck = ciborium::de::from_reader(&encoded[..]).unwrap();

        assert_eq!(ack, decoded);
    }

    #[test]
    fn failed_ack_carries_error() {
        let ack = MessageAck {
            success: false,
            saved_id: None,
            temp_id: "tmp-8".to_string(),
            error: Some("empty message".to_string()),
        };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&ack, &mut encoded).unwrap();
        let decoded: MessageAck = ciborium::de::from_reader(&encoded[..]).unwrap();

        assert!(!decoded.success);
        assert_eq!(decoded.error.as_deref(), Some("empty message"));
    }
}
