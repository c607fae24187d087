//! Connection lifecycle errors.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors from the connection state machine.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Operation attempted in wrong state
    #[error("invalid operation '{operation}' in state {state:?}")]
    InvalidState {
        /// Current connection state
        state: ConnectionState,
        /// Operation that was attempted
        operation: String,
    },

    /// Frame opcode not valid for the current state
    #[error("unexpected opcode {opcode:#06x} in state {state:?}")]
    UnexpectedFrame {
        /// Current connection state
        state: ConnectionState,
        /// Raw opcode from the frame header
        opcode: u16,
    },

    /// Frame payload did not decode to the expected type
    #[error("invalid payload for opcode {opcode:#06x}, expected {expected}")]
    InvalidPayload {
        /// Expected payload type name
        expected: &'static str,
        /// Raw opcode from the frame header
        opcode: u16,
    },

    /// Credential not presented within the grace period
    #[error("authentication timeout")]
    AuthTimeout,

    /// No activity within the idle timeout
    #[error("idle timeout")]
    IdleTimeout,

    /// Wire-format error from the protocol layer
    #[error("protocol error: {0}")]
    Protocol(#[from] palaver_proto::errors::ProtocolError),

    /// Transport-level I/O failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Whether the error leaves the connection usable.
    ///
    /// Transient errors are logged and the connection continues; everything
    /// else tears the connection down.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            // A stray frame is dropped, not fatal
            Self::UnexpectedFrame { .. } => true,

            Self::InvalidState { .. }
            | Self::InvalidPayload { .. }
            | Self::AuthTimeout
            | Self::IdleTimeout
            | Self::Protocol(_)
            | Self::Transport(_) => false,
        }
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<ConnectionError> for std::io::Error {
    fn from(err: ConnectionError) -> Self {
        std::io::Error::other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_frame_is_transient() {
        let err = ConnectionError::UnexpectedFrame {
            state: ConnectionState::Authenticated,
            opcode: 0x0042,
        };
        assert!(err.is_transient());
    }

    #[test]
    fn timeouts_are_fatal() {
        assert!(!ConnectionError::AuthTimeout.is_transient());
        assert!(!ConnectionError::IdleTimeout.is_transient());
    }

    #[test]
    fn protocol_error_converts() {
        let proto = palaver_proto::errors::ProtocolError::InvalidMagic;
        let err = ConnectionError::from(proto);
        assert!(matches!(err, ConnectionError::Protocol(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn io_error_round_trip() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let conn_err = ConnectionError::from(io_err);
        assert!(matches!(conn_err, ConnectionError::Transport(_)));

        let back: std::io::Error = conn_err.into();
        assert_eq!(back.kind(), std::io::ErrorKind::Other);
    }
}
