//! Conversation subscription registry.
//!
//! Tracks which sessions are subscribed to which conversations, with
//! bidirectional maps for O(1) lookup in both directions. Membership
//! authorization happens in the engine before a session is registered here;
//! this structure only records live subscriptions.

use std::collections::{HashMap, HashSet};

use palaver_proto::types::{ConversationId, SessionId, UserId};

/// Bidirectional session/conversation subscription maps.
///
/// # Invariants
///
/// - `conversation_sessions` and `session_conversations` stay mutually
///   consistent; every pair appears in both or neither
/// - Empty sets are removed eagerly, so map keys always have subscribers
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Sessions subscribed to each conversation
    conversation_sessions: HashMap<ConversationId, HashSet<SessionId>>,
    /// Conversations each session is subscribed to
    session_conversations: HashMap<SessionId, HashSet<ConversationId>>,
    /// User behind each session
    session_users: HashMap<SessionId, UserId>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a session to a conversation.
    ///
    /// Idempotent; subscribing twice has no additional effect.
    pub fn subscribe(
        &mut self,
        conversation_id: ConversationId,
        session_id: SessionId,
        user_id: UserId,
    ) {
        self.conversation_sessions.entry(conversation_id).or_default().insert(session_id);
        self.session_conversations.entry(session_id).or_default().insert(conversation_id);
        self.session_users.insert(session_id, user_id);
    }

    /// Remove a session from one conversation.
    ///
    /// Returns whether the session was actually subscribed.
    pub fn unsubscribe(&mut self, conversation_id: ConversationId, session_id: SessionId) -> bool {
        let Some(sessions) = self.conversation_sessions.get_mut(&conversation_id) else {
            return false;
        };

        if !sessions.remove(&session_id) {
            return false;
        }

        if sessions.is_empty() {
            self.conversation_sessions.remove(&conversation_id);
        }

        if let Some(conversations) = self.session_conversations.get_mut(&session_id) {
            conversations.remove(&conversation_id);
            if conversations.is_empty() {
                self.session_conversations.remove(&session_id);
            }
        }

        true
    }

    /// Remove a session from every conversation it is subscribed to.
    ///
    /// Returns the conversations it was removed from. Call on disconnect.
    pub fn remove_session(&mut self, session_id: SessionId) -> Vec<ConversationId> {
        self.session_users.remove(&session_id);

        let Some(conversations) = self.session_conversations.remove(&session_id) else {
            return Vec::new();
        };

        for conversation_id in &conversations {
            if let Some(sessions) = self.conversation_sessions.get_mut(conversation_id) {
                sessions.remove(&session_id);
                if sessions.is_empty() {
                    self.conversation_sessions.remove(conversation_id);
                }
            }
        }

        conversations.into_iter().collect()
    }

    /// Whether a session is subscribed to a conversation.
    #[must_use]
    pub fn is_subscribed(&self, conversation_id: ConversationId, session_id: SessionId) -> bool {
        self.conversation_sessions
            .get(&conversation_id)
            .is_some_and(|sessions| sessions.contains(&session_id))
    }

    /// Sessions subscribed to a conversation.
    pub fn sessions_in(
        &self,
        conversation_id: ConversationId,
    ) -> impl Iterator<Item = SessionId> + '_ {
        self.conversation_sessions.get(&conversation_id).into_iter().flatten().copied()
    }

    /// Distinct users with at least one subscribed session in a conversation.
    #[must_use]
    pub fn users_in(&self, conversation_id: ConversationId) -> HashSet<UserId> {
        self.sessions_in(conversation_id)
            .filter_map(|session_id| self.session_users.get(&session_id).copied())
            .collect()
    }

    /// User behind a session, if registered.
    #[must_use]
    pub fn user_of(&self, session_id: SessionId) -> Option<UserId> {
        self.session_users.get(&session_id).copied()
    }

    /// Number of sessions subscribed to a conversation.
    #[must_use]
    pub fn subscriber_count(&self, conversation_id: ConversationId) -> usize {
        self.conversation_sessions.get(&conversation_id).map_or(0, HashSet::len)
    }
}
