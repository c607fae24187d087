//! Ephemeral and presence event payload types.
//!
//! Typing indicators are fire-and-forget: never persisted, never acked.
//! Presence updates are broadcast to every connected session on an
//! online/offline transition.

use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Typing indicator (start or stop; the opcode distinguishes them).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Typing {
    /// Who is typing
    pub user_id: UserId,
    /// Display name for rendering without a lookup
    pub username: String,
}

/// Presence transition broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// The user whose presence changed
    pub user_id: UserId,
    /// True on first-connect, false on last-disconnect
    pub is_online: bool,
    /// Stamped only on the offline transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_update_round_trip() {
        let update = PresenceUpdate { user_id: 7, is_online: false, last_seen_secs: Some(123) };

        let mut encoded = Vec::new();
        ciborium::ser::into_writer(&update, &mut encoded).unwrap();
        let decoded: PresenceUpdate = ciborium::de::from_reader(&encoded[..]).unwrap();

        assert_eq!(update, decoded);
    }
}
