//! Session layer state machine.
//!
//! Manages connection lifecycle, heartbeats, timeouts, and graceful
//! shutdown. Uses the action pattern: methods take time as input and return
//! actions for the driver to execute. This keeps the state machine pure (no
//! I/O) and makes testing straightforward.
//!
//! Authentication itself is asynchronous (credential verification goes
//! through a store), so it happens in the engine; this machine only tracks
//! the grace deadline and flips to `Authenticated` when told.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  Auth verified  ┌───────────────┐
//! │ Init │────────────────>│ Authenticated │
//! └──────┘                 └───────────────┘
//!     │                           │
//!     │ Grace timeout/Error       │ Goodbye/Idle timeout
//!     ↓                           ↓
//! ┌────────┐                 ┌────────┐
//! │ Closed │<────────────────│ Closed │
//! └────────┘                 └────────┘
//! ```

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use palaver_proto::{Frame, FrameHeader, Opcode, Payload, payloads::session::Goodbye};

use crate::error::ConnectionError;

/// Time allowed to present a valid credential after transport accept.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum time allowed without any activity before the connection is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval at which the connection sends Ping frames while authenticated.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Actions returned by the connection state machine.
///
/// The driver executes these actions:
/// - `SendFrame`: serialize and send the frame over the transport
/// - `Close`: close the connection with the given reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Send this frame to the peer
    SendFrame(Frame),

    /// Close the connection with this reason
    Close {
        /// Reason for closing the connection
        reason: String,
    },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected, inside the auth grace period, no credential verified yet
    Init,
    /// Credential verified, session is live
    Authenticated,
    /// Connection closed (graceful or error)
    Closed,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Grace period for presenting a credential
    pub auth_timeout: Duration,
    /// Idle timeout before disconnecting
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be < `idle_timeout` / 2)
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Connection state machine
///
/// Manages lifecycle, timeouts, and heartbeats for a single connection.
///
/// This is a pure state machine - no I/O, no Environment storage. Time is
/// passed as a parameter to methods that need it.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct Connection<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Current state
    state: ConnectionState,
    /// Configuration
    config: ConnectionConfig,
    /// Last activity timestamp
    last_activity: I,
    /// Last heartbeat sent timestamp
    last_heartbeat: Option<I>,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new connection in [`ConnectionState::Init`] state.
    ///
    /// The auth grace period starts at `now`.
    pub fn new(now: I, config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Init,
            config,
            last_activity: now,
            last_heartbeat: None,
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Grace period for credential presentation.
    #[must_use]
    pub fn auth_timeout(&self) -> Duration {
        self.config.auth_timeout
    }

    /// Promote the connection after the engine verified its credential.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not in Init state
    pub fn mark_authenticated(&mut self, now: I) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Init {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "mark_authenticated".to_string(),
            });
        }

        self.state = ConnectionState::Authenticated;
        self.last_activity = now;
        Ok(())
    }

    /// Mark connection as closed.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Mark connection as active (call when receiving frames).
    pub fn update_activity(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Elapsed time since last activity, if the state's timeout is exceeded.
    /// `None` otherwise.
    #[must_use]
    pub fn check_timeout(&self, now: I) -> Option<Duration> {
        let elapsed = now - self.last_activity;

        let timeout = match self.state {
            ConnectionState::Init => self.config.auth_timeout,
            ConnectionState::Authenticated => self.config.idle_timeout,
            ConnectionState::Closed => return None,
        };

        if elapsed > timeout { Some(elapsed) } else { None }
    }

    /// Process periodic maintenance (timeouts and heartbeats).
    ///
    /// Call this periodically to trigger timeout detection and heartbeat
    /// sending. A connection that outlives its auth grace period is closed
    /// here.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(elapsed) = self.check_timeout(now) {
            let reason = match self.state {
                ConnectionState::Init => format!("auth grace period expired after {elapsed:?}"),
                ConnectionState::Authenticated => format!("idle timeout after {elapsed:?}"),
                ConnectionState::Closed => "timeout".to_string(),
            };

            self.close();
            actions.push(ConnectionAction::Close { reason });
            return actions;
        }

        if self.state == ConnectionState::Authenticated {
            let should_send = match self.last_heartbeat {
                None => true, // Never sent heartbeat
                Some(last) => {
                    let elapsed = now - last;
                    elapsed >= self.config.heartbeat_interval
                },
            };

            if should_send {
                let ping_frame = Frame::new(FrameHeader::new(Opcode::Ping), Vec::new());

                actions.push(ConnectionAction::SendFrame(ping_frame));
                self.last_heartbeat = Some(now);
                self.last_activity = now;
            }
        }

        actions
    }

    /// Process a session-layer frame (Ping, Pong, Goodbye).
    ///
    /// Application frames are handled by the engine; it calls
    /// [`Self::update_activity`] for those. This method covers only the
    /// frames the lifecycle layer owns.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::UnexpectedFrame` if opcode invalid for the state
    /// - `ConnectionError::InvalidPayload` if CBOR deserialization fails
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.last_activity = now;

        let Some(opcode) = frame.header.opcode_enum() else {
            return Err(ConnectionError::UnexpectedFrame {
                state: self.state,
                opcode: frame.header.opcode(),
            });
        };

        match (self.state, opcode) {
            (ConnectionState::Authenticated, Opcode::Ping) => {
                let pong_frame = Frame::new(FrameHeader::new(Opcode::Pong), Vec::new());
                Ok(vec![ConnectionAction::SendFrame(pong_frame)])
            },

            (ConnectionState::Authenticated, Opcode::Pong) => {
                // Activity already updated
                Ok(vec![])
            },

            (state, Opcode::Goodbye) if state != ConnectionState::Closed => {
                let payload = Payload::from_frame(frame)?;

                let reason = match payload {
                    Payload::Goodbye(goodbye) => goodbye.reason,
                    _ => {
                        return Err(ConnectionError::InvalidPayload {
                            expected: "Goodbye",
                            opcode: Opcode::Goodbye.to_u16(),
                        });
                    },
                };

                self.state = ConnectionState::Closed;

                let reply = Payload::Goodbye(Goodbye { reason: "ack".to_string() });
                let frame = reply.into_frame(FrameHeader::new(Opcode::Goodbye))?;

                Ok(vec![
                    ConnectionAction::SendFrame(frame),
                    ConnectionAction::Close { reason: format!("peer goodbye: {reason}") },
                ])
            },

            (state, opcode) => {
                Err(ConnectionError::UnexpectedFrame { state, opcode: opcode.to_u16() })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> Instant {
        Instant::now()
    }

    #[test]
    fn connection_lifecycle() {
        let now = t0();
        let mut conn = Connection::new(now, ConnectionConfig::default());

        assert_eq!(conn.state(), ConnectionState::Init);

        conn.mark_authenticated(now).unwrap();
        assert_eq!(conn.state(), ConnectionState::Authenticated);

        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn mark_authenticated_twice_fails() {
        let now = t0();
        let mut conn = Connection::new(now, ConnectionConfig::default());

        conn.mark_authenticated(now).unwrap();
        let result = conn.mark_authenticated(now);
        assert!(matches!(result, Err(ConnectionError::InvalidState { .. })));
    }

    #[test]
    fn auth_grace_period_expires() {
        let now = t0();
        let mut conn = Connection::new(now, ConnectionConfig::default());

        // Inside the grace period: nothing happens
        let actions = conn.tick(now + Duration::from_secs(5));
        assert!(actions.is_empty());
        assert_eq!(conn.state(), ConnectionState::Init);

        // Past the grace period: forcibly closed
        let actions = conn.tick(now + Duration::from_secs(11));
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], ConnectionAction::Close { .. }));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn authenticated_connection_gets_idle_timeout_not_grace() {
        let now = t0();
        let mut conn = Connection::new(now, ConnectionConfig::default());
        conn.mark_authenticated(now).unwrap();

        // 11s > auth grace but < idle timeout; must stay open
        assert!(conn.check_timeout(now + Duration::from_secs(11)).is_none());

        // Past the idle timeout
        assert!(conn.check_timeout(now + Duration::from_secs(61)).is_some());
    }

    #[test]
    fn tick_sends_heartbeat_when_authenticated() {
        let now = t0();
        let mut conn = Connection::new(now, ConnectionConfig::default());
        conn.mark_authenticated(now).unwrap();

        let actions = conn.tick(now + Duration::from_secs(1));
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ConnectionAction::SendFrame(frame) => {
                assert_eq!(frame.header.opcode_enum(), Some(Opcode::Ping));
            },
            other => panic!("expected SendFrame(Ping), got {other:?}"),
        }

        // Second tick inside the interval sends nothing
        let actions = conn.tick(now + Duration::from_secs(2));
        assert!(actions.is_empty());

        // Past the interval, another ping
        let actions = conn.tick(now + Duration::from_secs(25));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn handle_ping_responds_with_pong() {
        let now = t0();
        let mut conn = Connection::new(now, ConnectionConfig::default());
        conn.mark_authenticated(now).unwrap();

        let ping_frame = Frame::new(FrameHeader::new(Opcode::Ping), Vec::new());

        let actions = conn.handle_frame(&ping_frame, now).unwrap();
        assert_eq!(actions.len(), 1);

        match &actions[0] {
            ConnectionAction::SendFrame(frame) => {
                assert_eq!(frame.header.opcode_enum(), Some(Opcode::Pong));
                assert_eq!(frame.payload.len(), 0);
            },
            other => panic!("expected SendFrame(Pong), got {other:?}"),
        }
    }

    #[test]
    fn handle_pong_updates_activity() {
        let now = t0();
        let mut conn = Connection::new(now, ConnectionConfig::default());
        conn.mark_authenticated(now).unwrap();

        let pong_frame = Frame::new(FrameHeader::new(Opcode::Pong), Vec::new());

        let t1 = now + Duration::from_secs(30);
        let actions = conn.handle_frame(&pong_frame, t1).unwrap();
        assert!(actions.is_empty());

        // 40s after the pong, but only 40s from last activity: not timed out
        let t2 = t1 + Duration::from_secs(40);
        assert!(conn.check_timeout(t2).is_none());
    }

    #[test]
    fn handle_ping_before_authenticated() {
        let now = t0();
        let mut conn = Connection::new(now, ConnectionConfig::default());

        let ping_frame = Frame::new(FrameHeader::new(Opcode::Ping), Vec::new());

        let result = conn.handle_frame(&ping_frame, now);
        assert!(matches!(result, Err(ConnectionError::UnexpectedFrame { .. })));
    }

    #[test]
    fn handle_goodbye_closes_and_acks() {
        let now = t0();
        let mut conn = Connection::new(now, ConnectionConfig::default());
        conn.mark_authenticated(now).unwrap();

        let goodbye = Payload::Goodbye(Goodbye { reason: "client shutdown".to_string() });
        let goodbye_frame = goodbye.into_frame(FrameHeader::new(Opcode::Goodbye)).unwrap();

        let actions = conn.handle_frame(&goodbye_frame, now).unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(actions.len(), 2);

        assert!(matches!(actions[0], ConnectionAction::SendFrame(_)));
        assert!(matches!(actions[1], ConnectionAction::Close { .. }));
    }

    #[test]
    fn handle_goodbye_during_grace_period() {
        let now = t0();
        let mut conn = Connection::new(now, ConnectionConfig::default());

        let goodbye = Payload::Goodbye(Goodbye { reason: "never mind".to_string() });
        let goodbye_frame = goodbye.into_frame(FrameHeader::new(Opcode::Goodbye)).unwrap();

        let actions = conn.handle_frame(&goodbye_frame, now).unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(actions.len(), 2);
    }
}
