//! Frame operation codes.

/// Operation code identifying the payload type of a frame.
///
/// The opcode lives in the frame header so the server can route frames
/// without deserializing the CBOR payload. Ranges are grouped by concern:
/// `0x000x` session, `0x001x` channel membership, `0x002x` messages,
/// `0x003x` ephemeral events, `0x004x` presence, `0x00FF` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Client credential presentation (first frame on a connection)
    Auth = 0x0001,
    /// Server acceptance of Auth
    AuthOk = 0x0002,
    /// Graceful disconnect
    Goodbye = 0x0003,
    /// Keepalive ping
    Ping = 0x0004,
    /// Keepalive pong
    Pong = 0x0005,

    /// Subscribe to a conversation channel
    JoinChannel = 0x0010,
    /// Server acceptance of JoinChannel
    JoinAck = 0x0011,
    /// Unsubscribe from a conversation channel
    LeaveChannel = 0x0012,

    /// Submit a new message
    NewMessage = 0x0020,
    /// Per-sender acknowledgement of NewMessage
    MessageAck = 0x0021,
    /// Fan-out of an accepted message to the channel
    MessageReceived = 0x0022,
    /// Delivered-set update after fan-out
    MessageDelivered = 0x0023,
    /// Mark a message as read
    MarkRead = 0x0024,
    /// Read-status update broadcast
    StatusUpdate = 0x0025,
    /// Set the reaction on a message
    React = 0x0026,
    /// Reaction update broadcast
    ReactionUpdate = 0x0027,

    /// Typing indicator start
    Typing = 0x0030,
    /// Typing indicator stop
    StopTyping = 0x0031,

    /// Presence transition broadcast
    PresenceUpdate = 0x0040,

    /// Error response
    Error = 0x00FF,
}

impl Opcode {
    /// Raw u16 wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire value. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Auth),
            0x0002 => Some(Self::AuthOk),
            0x0003 => Some(Self::Goodbye),
            0x0004 => Some(Self::Ping),
            0x0005 => Some(Self::Pong),
            0x0010 => Some(Self::JoinChannel),
            0x0011 => Some(Self::JoinAck),
            0x0012 => Some(Self::LeaveChannel),
            0x0020 => Some(Self::NewMessage),
            0x0021 => Some(Self::MessageAck),
            0x0022 => Some(Self::MessageReceived),
            0x0023 => Some(Self::MessageDelivered),
            0x0024 => Some(Self::MarkRead),
            0x0025 => Some(Self::StatusUpdate),
            0x0026 => Some(Self::React),
            0x0027 => Some(Self::ReactionUpdate),
            0x0030 => Some(Self::Typing),
            0x0031 => Some(Self::StopTyping),
            0x0040 => Some(Self::PresenceUpdate),
            0x00FF => Some(Self::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[Opcode] = &[
        Opcode::Auth,
        Opcode::AuthOk,
        Opcode::Goodbye,
        Opcode::Ping,
        Opcode::Pong,
        Opcode::JoinChannel,
        Opcode::JoinAck,
        Opcode::LeaveChannel,
        Opcode::NewMessage,
        Opcode::MessageAck,
        Opcode::MessageReceived,
        Opcode::MessageDelivered,
        Opcode::MarkRead,
        Opcode::StatusUpdate,
        Opcode::React,
        Opcode::ReactionUpdate,
        Opcode::Typing,
        Opcode::StopTyping,
        Opcode::PresenceUpdate,
        Opcode::Error,
    ];

    #[test]
    fn wire_value_round_trip() {
        for opcode in ALL {
            assert_eq!(Opcode::from_u16(opcode.to_u16()), Some(*opcode));
        }
    }

    #[test]
    fn unknown_values_rejected() {
        assert_eq!(Opcode::from_u16(0x0000), None);
        assert_eq!(Opcode::from_u16(0x00FE), None);
        assert_eq!(Opcode::from_u16(0xFFFF), None);
    }
}
