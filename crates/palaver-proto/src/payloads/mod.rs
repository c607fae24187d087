//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary for performance, but payloads use CBOR for
//! type safety and forward compatibility. The `Payload` enum covers all
//! message types: session management (Auth, Ping, ...), channel membership,
//! message fan-out, and ephemeral events.
//!
//! CBOR is self-describing (field names embedded), compact, and needs no
//! code generation. The fan-out path re-broadcasts raw frames and never
//! re-encodes payloads.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Round-trip encoding must produce identical values.

pub mod chat;
pub mod events;
pub mod session;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
///
/// The payload type is determined by the `Opcode` in the frame header, so we
/// serialize only the inner struct content (no variant tag in CBOR).
///
/// # Security
///
/// - No Variant Tag: the frame header's `opcode` field already identifies
///   the payload type, so attackers cannot send mismatched opcode/payload
///   pairs.
/// - Exhaustive Matching: adding a new variant causes compile errors in
///   `encode()`, `decode()`, and `opcode()`, so no variant is accidentally
///   left unhandled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session management
    /// Credential presentation
    Auth(session::Auth),
    /// Server acceptance of Auth
    AuthOk(session::AuthOk),
    /// Graceful disconnect
    Goodbye(session::Goodbye),
    /// Ping for keepalive
    Ping,
    /// Pong response
    Pong,

    // Channel membership
    /// Subscribe to a conversation channel
    JoinChannel(chat::JoinChannel),
    /// Join acceptance
    JoinAck(chat::JoinAck),
    /// Unsubscribe from a conversation channel
    LeaveChannel,

    // Messages
    /// Submit a message
    NewMessage(chat::NewMessage),
    /// Per-sender submit acknowledgement
    MessageAck(chat::MessageAck),
    /// Message fan-out to the channel
    MessageReceived(chat::MessageReceived),
    /// Delivered-set update
    MessageDelivered(chat::MessageDelivered),
    /// Mark a message read
    MarkRead(chat::MarkRead),
    /// Read-status broadcast
    StatusUpdate(chat::StatusUpdate),
    /// Set a reaction
    React(chat::React),
    /// Reaction broadcast
    ReactionUpdate(chat::ReactionUpdate),

    // Ephemeral events
    /// Typing indicator start
    Typing(events::Typing),
    /// Typing indicator stop
    StopTyping(events::Typing),
    /// Presence transition broadcast
    PresenceUpdate(events::PresenceUpdate),

    // Error frame
    /// Error response
    Error(ErrorPayload),
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
    /// Optional retry-after duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorPayload {
    /// Frame was rejected by the server.
    pub const FRAME_REJECTED: u16 = 0x0001;
    /// Credential missing, invalid, or unknown subject. Connection-fatal.
    pub const UNAUTHENTICATED: u16 = 0x0002;
    /// Conversation does not exist.
    pub const NOT_FOUND: u16 = 0x0003;
    /// User is not a member of the conversation.
    pub const FORBIDDEN: u16 = 0x0004;
    /// Message had no content and no media.
    pub const EMPTY_MESSAGE: u16 = 0x0005;
    /// Session is not subscribed to the conversation channel.
    pub const NOT_SUBSCRIBED: u16 = 0x0006;
    /// A store operation failed.
    pub const PERSISTENCE: u16 = 0x0007;
    /// Invalid payload format.
    pub const INVALID_PAYLOAD: u16 = 0x0008;

    /// Create a frame rejection error.
    pub fn frame_rejected(reason: impl Into<String>) -> Self {
        Self { code: Self::FRAME_REJECTED, message: reason.into(), retry_after: None }
    }

    /// Create an authentication failure error.
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self { code: Self::UNAUTHENTICATED, message: reason.into(), retry_after: None }
    }

    /// Create a conversation not found error.
    pub fn not_found(conversation_id: u128) -> Self {
        Self {
            code: Self::NOT_FOUND,
            message: format!("conversation not found: {conversation_id:032x}"),
            retry_after: None,
        }
    }

    /// Create a membership denial error.
    pub fn forbidden(conversation_id: u128) -> Self {
        Self {
            code: Self::FORBIDDEN,
            message: format!("not a member of conversation {conversation_id:032x}"),
            retry_after: None,
        }
    }

    /// Create an empty message error.
    pub fn empty_message() -> Self {
        Self {
            code: Self::EMPTY_MESSAGE,
            message: "message has no content and no media".to_string(),
            retry_after: None,
        }
    }

    /// Create a not-subscribed error.
    pub fn not_subscribed(conversation_id: u128) -> Self {
        Self {
            code: Self::NOT_SUBSCRIBED,
            message: format!("not subscribed to conversation {conversation_id:032x}"),
            retry_after: None,
        }
    }

    /// Create a persistence error.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self { code: Self::PERSISTENCE, message: msg.into(), retry_after: None }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into(), retry_after: None }
    }
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Auth(_) => Opcode::Auth,
            Self::AuthOk(_) => Opcode::AuthOk,
            Self::Goodbye(_) => Opcode::Goodbye,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::JoinChannel(_) => Opcode::JoinChannel,
            Self::JoinAck(_) => Opcode::JoinAck,
            Self::LeaveChannel => Opcode::LeaveChannel,
            Self::NewMessage(_) => Opcode::NewMessage,
            Self::MessageAck(_) => Opcode::MessageAck,
            Self::MessageReceived(_) => Opcode::MessageReceived,
            Self::MessageDelivered(_) => Opcode::MessageDelivered,
            Self::MarkRead(_) => Opcode::MarkRead,
            Self::StatusUpdate(_) => Opcode::StatusUpdate,
            Self::React(_) => Opcode::React,
            Self::ReactionUpdate(_) => Opcode::ReactionUpdate,
            Self::Typing(_) => Opcode::Typing,
            Self::StopTyping(_) => Opcode::StopTyping,
            Self::PresenceUpdate(_) => Opcode::PresenceUpdate,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode payload to buffer
    ///
    /// Serializes only the inner struct, NOT the variant tag. The frame
    /// header's opcode already identifies the payload type.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Auth(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::AuthOk(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Goodbye(inner) => ciborium::ser::into_writer(inner, &mut writer),
            // Zero-byte payloads
            Self::Ping | Self::Pong | Self::LeaveChannel => Ok(()),
            Self::JoinChannel(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::JoinAck(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::NewMessage(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MessageAck(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MessageReceived(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MessageDelivered(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MarkRead(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::StatusUpdate(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::React(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ReactionUpdate(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Typing(inner) | Self::StopTyping(inner) => {
                ciborium::ser::into_writer(inner, &mut writer)
            },
            Self::PresenceUpdate(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload from bytes based on opcode
    ///
    /// # Security
    ///
    /// - Size validation happens BEFORE CBOR parsing begins, so the parser
    ///   never processes maliciously large inputs.
    /// - Unknown opcodes are rejected with an error rather than silently
    ///   ignored, preventing version confusion.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed `MAX_PAYLOAD_SIZE`
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        fn read<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
            ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
        }

        let payload = match opcode {
            Opcode::Auth => Self::Auth(read(bytes)?),
            Opcode::AuthOk => Self::AuthOk(read(bytes)?),
            Opcode::Goodbye => Self::Goodbye(read(bytes)?),
            Opcode::Ping => Self::Ping,
            Opcode::Pong => Self::Pong,
            Opcode::JoinChannel => Self::JoinChannel(read(bytes)?),
            Opcode::JoinAck => Self::JoinAck(read(bytes)?),
            Opcode::LeaveChannel => Self::LeaveChannel,
            Opcode::NewMessage => Self::NewMessage(read(bytes)?),
            Opcode::MessageAck => Self::MessageAck(read(bytes)?),
            Opcode::MessageReceived => Self::MessageReceived(read(bytes)?),
            Opcode::MessageDelivered => Self::MessageDelivered(read(bytes)?),
            Opcode::MarkRead => Self::MarkRead(read(bytes)?),
            Opcode::StatusUpdate => Self::StatusUpdate(read(bytes)?),
            Opcode::React => Self::React(read(bytes)?),
            Opcode::ReactionUpdate => Self::ReactionUpdate(read(bytes)?),
            Opcode::Typing => Self::Typing(read(bytes)?),
            Opcode::StopTyping => Self::StopTyping(read(bytes)?),
            Opcode::PresenceUpdate => Self::PresenceUpdate(read(bytes)?),
            Opcode::Error => Self::Error(read(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame
    ///
    /// Encodes the payload to CBOR bytes, sets the correct opcode in the
    /// header, and creates a Frame with automatic `payload_size` calculation.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf))
    }

    /// Parse payload from a raw transport frame
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is unrecognized
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds maximum size
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}
