//! Palaver wire protocol.
//!
//! Defines the transport framing and message payloads for the presence and
//! realtime fan-out engine:
//!
//! - [`FrameHeader`]: fixed 64-byte raw binary header (Big Endian) for cheap
//!   routing decisions without payload deserialization
//! - [`Frame`]: header + raw payload bytes (transport layer)
//! - [`Payload`]: CBOR-encoded message bodies, keyed by the header opcode
//! - [`types`]: shared data model (`UserIdentity`, `MessageEnvelope`, ...)
//!
//! Headers are raw binary for performance; payloads use CBOR for type safety
//! and forward compatibility.

pub mod errors;
mod frame;
mod header;
mod opcode;
pub mod payloads;
pub mod types;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{ErrorPayload, Payload};
pub use types::{
    ConversationId, MediaRef, MessageEnvelope, MessageId, SessionId, UserId, UserIdentity,
};

/// ALPN protocol identifier for QUIC transport negotiation.
pub const ALPN_PROTOCOL: &[u8] = b"palaver";
