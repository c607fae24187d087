//! Session management payload types.

use serde::{Deserialize, Serialize};

use crate::types::{SessionId, UserIdentity};

/// Client credential presentation.
///
/// Must be the first frame on a new connection; the server closes
/// connections that do not authenticate within the grace period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    /// Bearer credential. `None` is rejected as missing-credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Server acceptance of [`Auth`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOk {
    /// The authenticated identity as resolved by the server
    pub user: UserIdentity,
    /// Server-assigned session id for this connection
    pub session_id: SessionId,
}

/// Graceful disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Reason for disconnecting
    pub reason: String,
}
