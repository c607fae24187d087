//! Multi-device presence tracking.
//!
//! A user is online while at least one of their sessions is registered.
//! Transitions fire only on the edges: the first session of a user yields
//! [`PresenceTransition::Online`], and dropping the last one yields
//! [`PresenceTransition::Offline`] with the `last_seen` stamp taken at that
//! exact moment. Intermediate registrations and removals yield nothing.

use std::collections::{HashMap, HashSet};

use palaver_proto::types::{SessionId, UserId};

/// Edge produced by a presence change, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    /// User went from zero sessions to one.
    Online,
    /// User went from one session to zero. Carries the moment of the
    /// transition in Unix seconds.
    Offline {
        /// When the last session disappeared
        last_seen_secs: u64,
    },
}

/// Tracks which sessions each user currently has.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// Active sessions per user. Empty sets are removed eagerly so
    /// `is_online` is a plain containment check.
    sessions: HashMap<UserId, HashSet<SessionId>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for a user.
    ///
    /// Returns `Some(Online)` only when this is the user's first session.
    pub fn register(&mut self, user_id: UserId, session_id: SessionId) -> Option<PresenceTransition> {
        let sessions = self.sessions.entry(user_id).or_default();
        let was_empty = sessions.is_empty();
        sessions.insert(session_id);

        was_empty.then_some(PresenceTransition::Online)
    }

    /// Remove a session for a user.
    ///
    /// Returns `Some(Offline)` only when this was the user's last session,
    /// stamped with `now_secs`. Removing an unknown session is a no-op.
    pub fn deregister(
        &mut self,
        user_id: UserId,
        session_id: SessionId,
        now_secs: u64,
    ) -> Option<PresenceTransition> {
        let sessions = self.sessions.get_mut(&user_id)?;

        if !sessions.remove(&session_id) {
            return None;
        }

        if sessions.is_empty() {
            self.sessions.remove(&user_id);
            return Some(PresenceTransition::Offline { last_seen_secs: now_secs });
        }

        None
    }

    /// Whether the user has at least one active session.
    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.sessions.contains_key(&user_id)
    }

    /// Number of active sessions for a user.
    #[must_use]
    pub fn session_count(&self, user_id: UserId) -> usize {
        self.sessions.get(&user_id).map_or(0, HashSet::len)
    }

    /// Users currently online.
    pub fn online_users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.sessions.keys().copied()
    }
}
