//! External collaborator traits.
//!
//! The engine never talks to a database or identity provider directly; it
//! goes through these async traits, injected as `Arc<dyn _>`. In-memory
//! implementations back the test suite; production wires real backends.
//!
//! Store calls are suspension points: the engine must not hold any internal
//! lock across them except the per-conversation submit lock, which exists
//! precisely to serialize the submit pipeline.

use std::collections::HashSet;

use async_trait::async_trait;
use palaver_proto::types::{
    ConversationId, MediaRef, MessageEnvelope, MessageId, UserId, UserIdentity,
};
use thiserror::Error;

/// Why a credential was rejected.
///
/// All variants are connection-fatal: the server sends one error frame and
/// closes the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented.
    #[error("missing credential")]
    MissingCredential,

    /// Credential was malformed, had a bad signature, or was expired.
    #[error("invalid credential signature")]
    InvalidSignature,

    /// Signature verified but the subject does not exist.
    #[error("unknown subject")]
    UnknownSubject,
}

/// Errors from store implementations.
///
/// Stores are external systems; the engine maps these to persistence-error
/// acks and never retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// I/O or backend failure.
    #[error("store I/O error: {0}")]
    Io(String),

    /// Serialization failure.
    #[error("store serialization error: {0}")]
    Serialization(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Everything needed to persist a new message.
///
/// The store assigns the [`MessageId`] and returns the full envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    /// Sender identity snapshot
    pub sender: UserIdentity,
    /// Target conversation
    pub conversation_id: ConversationId,
    /// Text content
    pub content: String,
    /// Optional media attachment
    pub media: Option<MediaRef>,
    /// Server-stamped submit time (Unix seconds)
    pub sent_at_secs: u64,
}

/// Verifies client credentials and resolves them to identities.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a credential, resolving it to a full identity.
    ///
    /// `now_secs` is the server's wall clock, used for expiry checks.
    ///
    /// # Errors
    ///
    /// - `AuthError::MissingCredential` if `credential` is `None`
    /// - `AuthError::InvalidSignature` if malformed, forged, or expired
    /// - `AuthError::UnknownSubject` if the subject does not exist
    async fn verify(
        &self,
        credential: Option<&str>,
        now_secs: u64,
    ) -> Result<UserIdentity, AuthError>;
}

/// Durable user state.
///
/// `set_online` and `set_last_seen` are best-effort at call sites: presence
/// transitions are broadcast regardless of whether the store write succeeds.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Resolve a user id to its identity. `Ok(None)` if no such user.
    async fn identity(&self, user_id: UserId) -> Result<Option<UserIdentity>, StoreError>;

    /// Record the user's online flag.
    async fn set_online(&self, user_id: UserId, online: bool) -> Result<(), StoreError>;

    /// Record when the user was last seen (stamped on the offline
    /// transition).
    async fn set_last_seen(&self, user_id: UserId, at_secs: u64) -> Result<(), StoreError>;
}

/// Durable conversation state.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Member set of a conversation. `Ok(None)` if the conversation does not
    /// exist.
    ///
    /// Callers re-read this on every join attempt; implementations must not
    /// assume any caching layer above them.
    async fn members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<HashSet<UserId>>, StoreError>;

    /// Record the conversation's latest message (preview/ordering hint).
    async fn set_latest_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<(), StoreError>;
}

/// Durable message state.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message, assigning its id.
    async fn create(&self, draft: MessageDraft) -> Result<MessageEnvelope, StoreError>;

    /// Load a message by id. `Ok(None)` if no such message.
    async fn load(&self, message_id: MessageId) -> Result<Option<MessageEnvelope>, StoreError>;

    /// Overwrite a message's stored state (delivery/read/reaction updates).
    async fn save(&self, envelope: &MessageEnvelope) -> Result<(), StoreError>;
}
