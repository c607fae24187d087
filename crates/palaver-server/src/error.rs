//! Server error types.

use std::fmt;

/// Errors from the production server runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (bad address, missing cert, bad key)
    Config(String),
    /// Transport-level failure (bind, accept, stream I/O)
    Transport(String),
    /// Wire-format error
    Protocol(String),
    /// Engine rejected an operation
    Engine(String),
    /// Internal invariant violation
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Engine(msg) => write!(f, "engine error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<palaver_proto::errors::ProtocolError> for ServerError {
    fn from(err: palaver_proto::errors::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category() {
        let err = ServerError::Config("bad address".to_string());
        assert_eq!(err.to_string(), "configuration error: bad address");
    }

    #[test]
    fn io_error_converts_to_transport() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err = ServerError::from(io_err);
        assert!(matches!(err, ServerError::Transport(_)));
    }
}
