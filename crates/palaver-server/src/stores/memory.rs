//! In-memory store implementations.
//!
//! Thread-safe via internal mutexes. Data is lost on restart - intended for
//! development and testing, not production.
//!
//! # Panics
//!
//! All operations panic if the internal mutex is poisoned (a thread panicked
//! while holding the lock). This is intentional: poisoned state indicates a
//! bug and the store contents can no longer be trusted.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use palaver_core::store::{ConversationStore, MessageDraft, MessageStore, StoreError, UserStore};
use palaver_proto::types::{ConversationId, MessageEnvelope, MessageId, UserId, UserIdentity};

#[derive(Debug, Default)]
struct UserInner {
    identities: HashMap<UserId, UserIdentity>,
    online: HashMap<UserId, bool>,
    last_seen: HashMap<UserId, u64>,
}

/// In-memory user store.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserStore {
    inner: Arc<Mutex<UserInner>>,
}

impl MemoryUserStore {
    /// Create an empty user store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user (fixture helper).
    #[allow(clippy::expect_used)]
    pub fn add_user(&self, identity: UserIdentity) {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.identities.insert(identity.id, identity);
    }

    /// Stored online flag for a user.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn online_flag(&self, user_id: UserId) -> Option<bool> {
        self.inner.lock().expect("Mutex poisoned").online.get(&user_id).copied()
    }

    /// Stored last-seen stamp for a user.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn last_seen(&self, user_id: UserId) -> Option<u64> {
        self.inner.lock().expect("Mutex poisoned").last_seen.get(&user_id).copied()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    #[allow(clippy::expect_used)]
    async fn identity(&self, user_id: UserId) -> Result<Option<UserIdentity>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.identities.get(&user_id).cloned())
    }

    #[allow(clippy::expect_used)]
    async fn set_online(&self, user_id: UserId, online: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.online.insert(user_id, online);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn set_last_seen(&self, user_id: UserId, at_secs: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.last_seen.insert(user_id, at_secs);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ConversationInner {
    members: HashMap<ConversationId, HashSet<UserId>>,
    latest_message: HashMap<ConversationId, MessageId>,
}

/// In-memory conversation store.
#[derive(Debug, Clone, Default)]
pub struct MemoryConversationStore {
    inner: Arc<Mutex<ConversationInner>>,
}

impl MemoryConversationStore {
    /// Create an empty conversation store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a conversation with its member set (fixture helper).
    #[allow(clippy::expect_used)]
    pub fn add_conversation(
        &self,
        conversation_id: ConversationId,
        members: impl IntoIterator<Item = UserId>,
    ) {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.members.insert(conversation_id, members.into_iter().collect());
    }

    /// Change a conversation's member set in place (fixture helper).
    #[allow(clippy::expect_used)]
    pub fn remove_member(&self, conversation_id: ConversationId, user_id: UserId) {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if let Some(members) = inner.members.get_mut(&conversation_id) {
            members.remove(&user_id);
        }
    }

    /// Stored latest-message pointer for a conversation.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn latest_message(&self, conversation_id: ConversationId) -> Option<MessageId> {
        self.inner.lock().expect("Mutex poisoned").latest_message.get(&conversation_id).copied()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    #[allow(clippy::expect_used)]
    async fn members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<HashSet<UserId>>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.members.get(&conversation_id).cloned())
    }

    #[allow(clippy::expect_used)]
    async fn set_latest_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if !inner.members.contains_key(&conversation_id) {
            return Err(StoreError::NotFound(format!("conversation {conversation_id:#x}")));
        }

        inner.latest_message.insert(conversation_id, message_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MessageInner {
    messages: HashMap<MessageId, MessageEnvelope>,
    next_id: MessageId,
}

/// In-memory message store with a monotonic id counter.
#[derive(Debug, Clone)]
pub struct MemoryMessageStore {
    inner: Arc<Mutex<MessageInner>>,
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self { inner: Arc::new(Mutex::new(MessageInner { messages: HashMap::new(), next_id: 1 })) }
    }
}

impl MemoryMessageStore {
    /// Create an empty message store. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").messages.len()
    }

    /// Whether the store holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    #[allow(clippy::expect_used)]
    async fn create(&self, draft: MessageDraft) -> Result<MessageEnvelope, StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let id = inner.next_id;
        inner.next_id += 1;

        let envelope = MessageEnvelope {
            id,
            conversation_id: draft.conversation_id,
            sender: draft.sender,
            content: draft.content,
            media: draft.media,
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            reaction: None,
            sent_at_secs: draft.sent_at_secs,
        };

        inner.messages.insert(id, envelope.clone());
        Ok(envelope)
    }

    #[allow(clippy::expect_used)]
    async fn load(&self, message_id: MessageId) -> Result<Option<MessageEnvelope>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.messages.get(&message_id).cloned())
    }

    #[allow(clippy::expect_used)]
    async fn save(&self, envelope: &MessageEnvelope) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if !inner.messages.contains_key(&envelope.id) {
            return Err(StoreError::NotFound(format!("message {}", envelope.id)));
        }

        inner.messages.insert(envelope.id, envelope.clone());
        Ok(())
    }
}
