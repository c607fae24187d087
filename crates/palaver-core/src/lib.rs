//! Palaver core logic.
//!
//! Runtime-independent building blocks for the realtime fan-out engine:
//!
//! - [`env::Environment`]: abstraction over time, randomness, and sleeping,
//!   so the same logic runs against real or virtual resources
//! - [`connection::Connection`]: pure per-connection lifecycle state machine
//!   (auth grace period, idle timeout, heartbeats)
//! - [`store`]: async traits for the engine's external collaborators
//!   (authenticator, user/conversation/message stores)
//!
//! This crate does no I/O. Drivers execute the actions it returns.

pub mod connection;
pub mod env;
pub mod error;
pub mod store;

pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState};
pub use env::Environment;
pub use error::ConnectionError;
pub use store::{AuthError, Authenticator, ConversationStore, MessageDraft, MessageStore,
    StoreError, UserStore};
