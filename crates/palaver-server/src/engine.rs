//! Fan-out engine.
//!
//! Owns every live session: its lifecycle state machine, its outbound frame
//! queue, the subscription registry, and presence. The transport layer feeds
//! decoded frames in via [`Engine::handle_frame`] and drains each session's
//! queue to the wire in order.
//!
//! # Locking
//!
//! Two kinds of locks, never overlapping a store call except where noted:
//!
//! - `state` (std mutex): sessions, registry, presence. Held only for short
//!   synchronous sections; never across an await.
//! - per-conversation submit locks (tokio mutex): serialize the submit
//!   pipeline per conversation. Store calls DO run under these, which is the
//!   point - two submits to the same conversation cannot interleave, while
//!   submits to different conversations proceed in parallel.
//!
//! Fan-out ordering holds because frames are enqueued into the per-session
//! queues while the state lock (and for submits, the conversation lock) is
//! held; the writer task drains each queue FIFO.

use std::{
    collections::HashMap,
    ops::Sub,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use palaver_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionError, Environment,
    store::{
        AuthError, Authenticator, ConversationStore, MessageDraft, MessageStore, UserStore,
    },
};
use palaver_proto::{
    Frame, FrameHeader, Opcode, Payload,
    errors::ProtocolError,
    payloads::{ErrorPayload, chat, events, session},
    types::{ConversationId, SessionId, UserId, UserIdentity},
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    presence::{PresenceTracker, PresenceTransition},
    registry::SubscriptionRegistry,
};

/// Fatal engine errors.
///
/// Returning one of these means the session is done: the driver closes the
/// transport connection. Recoverable conditions (unknown conversation,
/// denied membership, empty message, store failure on submit) never surface
/// here - they are answered with error frames or failure acks and the
/// session lives on.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Credential verification failed. One error frame is sent first.
    #[error("authentication failed: {0}")]
    Unauthenticated(#[from] AuthError),

    /// Application frame arrived before authentication.
    #[error("session not authenticated")]
    NotAuthenticated,

    /// Frame referenced a session the engine does not know.
    #[error("session not found")]
    SessionNotFound,

    /// Session limit reached; connection refused.
    #[error("connection limit reached")]
    ConnectionLimit,

    /// Wire-format violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Lifecycle state machine rejected the frame fatally.
    #[error("connection error: {0}")]
    Connection(ConnectionError),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-connection lifecycle timeouts
    pub connection: ConnectionConfig,
    /// Maximum concurrent sessions
    pub max_connections: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { connection: ConnectionConfig::default(), max_connections: 10_000 }
    }
}

struct SessionEntry<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Lifecycle state machine
    conn: Connection<I>,
    /// Verified identity, set on successful auth
    user: Option<UserIdentity>,
    /// Outbound frame queue; the writer task drains it FIFO
    outbound: mpsc::UnboundedSender<Frame>,
}

struct EngineState<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    sessions: HashMap<SessionId, SessionEntry<I>>,
    registry: SubscriptionRegistry,
    presence: PresenceTracker,
}

/// The realtime fan-out engine.
///
/// One instance per server process. Cheap to share via `Arc`.
pub struct Engine<E: Environment> {
    state: Mutex<EngineState<E::Instant>>,
    /// Per-conversation submit serialization points
    submit_locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
    authenticator: Arc<dyn Authenticator>,
    users: Arc<dyn UserStore>,
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    env: E,
    config: EngineConfig,
}

impl<E: Environment> Engine<E> {
    /// Create an engine wired to its collaborators.
    pub fn new(
        env: E,
        config: EngineConfig,
        authenticator: Arc<dyn Authenticator>,
        users: Arc<dyn UserStore>,
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            state: Mutex::new(EngineState {
                sessions: HashMap::new(),
                registry: SubscriptionRegistry::new(),
                presence: PresenceTracker::new(),
            }),
            submit_locks: Mutex::new(HashMap::new()),
            authenticator,
            users,
            conversations,
            messages,
            env,
            config,
        }
    }

    /// Register a new session and return the receiving end of its outbound
    /// frame queue. The caller pumps that receiver to the wire.
    ///
    /// The auth grace period starts now.
    ///
    /// # Errors
    ///
    /// - `EngineError::ConnectionLimit` if the session cap is reached
    pub fn connect(
        &self,
        session_id: SessionId,
    ) -> Result<mpsc::UnboundedReceiver<Frame>, EngineError> {
        let mut state = self.state();

        if state.sessions.len() >= self.config.max_connections {
            return Err(EngineError::ConnectionLimit);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(self.env.now(), self.config.connection.clone());
        state.sessions.insert(session_id, SessionEntry { conn, user: None, outbound: tx });

        tracing::debug!(session_id, "session connected");
        Ok(rx)
    }

    /// Tear down a session: drop its subscriptions and, if this was the
    /// user's last session, flip presence to offline.
    pub async fn disconnect(&self, session_id: SessionId) {
        let now_secs = self.env.wall_clock_secs();

        let went_offline = {
            let mut state = self.state();

            let Some(entry) = state.sessions.remove(&session_id) else {
                return;
            };

            state.registry.remove_session(session_id);

            let mut went_offline = None;
            if let Some(user) = entry.user {
                let transition = state.presence.deregister(user.id, session_id, now_secs);
                if let Some(PresenceTransition::Offline { last_seen_secs }) = transition {
                    broadcast_presence(&state, user.id, false, Some(last_seen_secs));
                    went_offline = Some((user.id, last_seen_secs));
                }
            }

            went_offline
        };

        tracing::debug!(session_id, "session disconnected");

        // Presence store writes are best-effort; the broadcast already
        // happened and in-memory state is authoritative for routing
        if let Some((user_id, last_seen_secs)) = went_offline {
            if let Err(e) = self.users.set_online(user_id, false).await {
                tracing::warn!(user_id, error = %e, "failed to record offline flag");
            }
            if let Err(e) = self.users.set_last_seen(user_id, last_seen_secs).await {
                tracing::warn!(user_id, error = %e, "failed to record last-seen stamp");
            }
        }
    }

    /// Process one inbound frame for a session.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`EngineError`]; the caller must close the transport
    /// connection and call [`Engine::disconnect`]. Recoverable conditions
    /// are answered with error frames and return `Ok`.
    pub async fn handle_frame(&self, session_id: SessionId, frame: Frame) -> Result<(), EngineError> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;

        {
            let mut state = self.state();
            let entry =
                state.sessions.get_mut(&session_id).ok_or(EngineError::SessionNotFound)?;
            entry.conn.update_activity(self.env.now());
        }

        match opcode {
            Opcode::Auth => self.handle_auth(session_id, &frame).await,
            Opcode::Ping | Opcode::Pong | Opcode::Goodbye => {
                self.handle_session_frame(session_id, &frame).await
            },
            Opcode::JoinChannel => self.handle_join(session_id, &frame).await,
            Opcode::LeaveChannel => self.handle_leave(session_id, &frame),
            Opcode::NewMessage => self.handle_submit(session_id, &frame).await,
            Opcode::MarkRead => self.handle_mark_read(session_id, &frame).await,
            Opcode::React => self.handle_react(session_id, &frame).await,
            Opcode::Typing | Opcode::StopTyping => self.handle_typing(session_id, &frame),

            // Server-to-client opcodes from a client are dropped
            Opcode::AuthOk
            | Opcode::JoinAck
            | Opcode::MessageAck
            | Opcode::MessageReceived
            | Opcode::MessageDelivered
            | Opcode::StatusUpdate
            | Opcode::ReactionUpdate
            | Opcode::PresenceUpdate
            | Opcode::Error => {
                tracing::warn!(session_id, opcode = ?opcode, "dropped server-only opcode from client");
                Ok(())
            },
        }
    }

    /// Run periodic maintenance: timeouts and heartbeats for every session,
    /// then prune idle submit locks.
    pub async fn tick(&self) {
        let now = self.env.now();
        let mut to_close = Vec::new();

        {
            let mut state = self.state();
            let session_ids: Vec<SessionId> = state.sessions.keys().copied().collect();

            for session_id in session_ids {
                let actions = match state.sessions.get_mut(&session_id) {
                    Some(entry) => entry.conn.tick(now),
                    None => continue,
                };

                for action in actions {
                    match action {
                        ConnectionAction::SendFrame(frame) => send_to(&state, session_id, frame),
                        ConnectionAction::Close { reason } => {
                            tracing::info!(session_id, reason, "closing timed-out session");
                            to_close.push(session_id);
                        },
                    }
                }
            }
        }

        for session_id in to_close {
            self.disconnect(session_id).await;
        }

        self.prune_submit_locks();
    }

    /// Number of conversations with a live submit serialization point.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn submit_lock_count(&self) -> usize {
        self.submit_locks.lock().expect("Mutex poisoned").len()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    /// Whether a user has at least one live session.
    #[must_use]
    pub fn is_user_online(&self, user_id: UserId) -> bool {
        self.state().presence.is_online(user_id)
    }

    // INVARIANT: poisoning means another thread panicked while mutating
    // engine state; routing decisions would be made on corrupt data.
    #[allow(clippy::expect_used)]
    fn state(&self) -> MutexGuard<'_, EngineState<E::Instant>> {
        self.state.lock().expect("Mutex poisoned")
    }

    #[allow(clippy::expect_used)]
    fn submit_lock(&self, conversation_id: ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.submit_locks.lock().expect("Mutex poisoned");
        Arc::clone(locks.entry(conversation_id).or_default())
    }

    // A strong count of 1 means no submit currently holds a clone, so the
    // entry can go; the next submit to that conversation recreates it. This
    // keeps the map proportional to in-flight submits instead of every
    // conversation ever written to.
    #[allow(clippy::expect_used)]
    fn prune_submit_locks(&self) {
        let mut locks = self.submit_locks.lock().expect("Mutex poisoned");
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Verified identity behind a session.
    ///
    /// An unauthenticated session gets one error frame and a fatal error.
    fn session_user(&self, session_id: SessionId) -> Result<UserIdentity, EngineError> {
        let state = self.state();
        let entry = state.sessions.get(&session_id).ok_or(EngineError::SessionNotFound)?;

        match &entry.user {
            Some(user) => Ok(user.clone()),
            None => {
                let error = ErrorPayload::unauthenticated("authentication required");
                if let Some(frame) = build_frame(Payload::Error(error), |_| {}) {
                    send_to(&state, session_id, frame);
                }
                Err(EngineError::NotAuthenticated)
            },
        }
    }

    fn send_error(
        &self,
        session_id: SessionId,
        error: ErrorPayload,
        conversation_id: ConversationId,
        request_id: u32,
    ) {
        let state = self.state();
        let frame = build_frame(Payload::Error(error), |header| {
            header.set_conversation_id(conversation_id);
            header.set_request_id(request_id);
        });
        if let Some(frame) = frame {
            send_to(&state, session_id, frame);
        }
    }

    fn send_ack_failure(
        &self,
        session_id: SessionId,
        conversation_id: ConversationId,
        request_id: u32,
        temp_id: &str,
        reason: &str,
    ) {
        let ack = chat::MessageAck {
            success: false,
            saved_id: None,
            temp_id: temp_id.to_string(),
            error: Some(reason.to_string()),
        };

        let state = self.state();
        let frame = build_frame(Payload::MessageAck(ack), |header| {
            header.set_conversation_id(conversation_id);
            header.set_request_id(request_id);
        });
        if let Some(frame) = frame {
            send_to(&state, session_id, frame);
        }
    }

    async fn handle_auth(&self, session_id: SessionId, frame: &Frame) -> Result<(), EngineError> {
        let Payload::Auth(auth) = Payload::from_frame(frame)? else {
            return Ok(());
        };

        let now_secs = self.env.wall_clock_secs();

        let user = match self.authenticator.verify(auth.credential.as_deref(), now_secs).await {
            Ok(user) => user,
            Err(e) => {
                tracing::info!(session_id, error = %e, "authentication rejected");

                let state = self.state();
                let error = ErrorPayload::unauthenticated(e.to_string());
                if let Some(frame) = build_frame(Payload::Error(error), |header| {
                    header.set_request_id(frame.header.request_id());
                }) {
                    send_to(&state, session_id, frame);
                }
                return Err(EngineError::Unauthenticated(e));
            },
        };

        let went_online = {
            let mut state = self.state();

            {
                let entry =
                    state.sessions.get_mut(&session_id).ok_or(EngineError::SessionNotFound)?;
                entry.conn.mark_authenticated(self.env.now()).map_err(EngineError::Connection)?;
                entry.user = Some(user.clone());
            }

            let transition = state.presence.register(user.id, session_id);

            let ack = session::AuthOk { user: user.clone(), session_id };
            if let Some(frame) = build_frame(Payload::AuthOk(ack), |header| {
                header.set_request_id(frame.header.request_id());
                header.set_sender_id(user.id);
                header.set_timestamp(now_secs);
            }) {
                send_to(&state, session_id, frame);
            }

            if transition == Some(PresenceTransition::Online) {
                broadcast_presence(&state, user.id, true, None);
                true
            } else {
                false
            }
        };

        tracing::info!(session_id, user_id = user.id, "session authenticated");

        if went_online {
            if let Err(e) = self.users.set_online(user.id, true).await {
                tracing::warn!(user_id = user.id, error = %e, "failed to record online flag");
            }
        }

        Ok(())
    }

    async fn handle_session_frame(
        &self,
        session_id: SessionId,
        frame: &Frame,
    ) -> Result<(), EngineError> {
        let now = self.env.now();
        let mut close = false;

        {
            let mut state = self.state();

            let result = {
                let entry =
                    state.sessions.get_mut(&session_id).ok_or(EngineError::SessionNotFound)?;
                entry.conn.handle_frame(frame, now)
            };

            match result {
                Ok(actions) => {
                    for action in actions {
                        match action {
                            ConnectionAction::SendFrame(frame) => {
                                send_to(&state, session_id, frame);
                            },
                            ConnectionAction::Close { reason } => {
                                tracing::debug!(session_id, reason, "closing session");
                                close = true;
                            },
                        }
                    }
                },
                Err(e) if e.is_transient() => {
                    tracing::debug!(session_id, error = %e, "dropped frame");
                },
                Err(e) => return Err(EngineError::Connection(e)),
            }
        }

        if close {
            self.disconnect(session_id).await;
        }

        Ok(())
    }

    /// Join a conversation channel.
    ///
    /// Membership is re-read from the store on every attempt, so a user
    /// removed from a conversation cannot rejoin through a stale view.
    async fn handle_join(&self, session_id: SessionId, frame: &Frame) -> Result<(), EngineError> {
        let user = self.session_user(session_id)?;
        let conversation_id = frame.header.conversation_id();
        let request_id = frame.header.request_id();

        let members = match self.conversations.members(conversation_id).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "membership lookup failed");
                self.send_error(
                    session_id,
                    ErrorPayload::persistence(e.to_string()),
                    conversation_id,
                    request_id,
                );
                return Ok(());
            },
        };

        let Some(members) = members else {
            self.send_error(
                session_id,
                ErrorPayload::not_found(conversation_id),
                conversation_id,
                request_id,
            );
            return Ok(());
        };

        if !members.contains(&user.id) {
            tracing::warn!(session_id, user_id = user.id, "join denied: not a member");
            self.send_error(
                session_id,
                ErrorPayload::forbidden(conversation_id),
                conversation_id,
                request_id,
            );
            return Ok(());
        }

        {
            let mut state = self.state();
            state.registry.subscribe(conversation_id, session_id, user.id);

            let ack = chat::JoinAck { conversation_id };
            if let Some(frame) = build_frame(Payload::JoinAck(ack), |header| {
                header.set_conversation_id(conversation_id);
                header.set_request_id(request_id);
            }) {
                send_to(&state, session_id, frame);
            }
        }

        tracing::debug!(session_id, user_id = user.id, "joined channel");
        Ok(())
    }

    fn handle_leave(&self, session_id: SessionId, frame: &Frame) -> Result<(), EngineError> {
        self.session_user(session_id)?;
        let conversation_id = frame.header.conversation_id();

        let removed = self.state().registry.unsubscribe(conversation_id, session_id);
        tracing::debug!(session_id, removed, "left channel");
        Ok(())
    }

    /// The submit pipeline.
    ///
    /// Under the per-conversation lock: persist, best-effort latest-message
    /// pointer, fan out to every subscriber (sender included), ack the
    /// sender, stamp the delivered set, persist it, broadcast it.
    async fn handle_submit(&self, session_id: SessionId, frame: &Frame) -> Result<(), EngineError> {
        let user = self.session_user(session_id)?;
        let conversation_id = frame.header.conversation_id();
        let request_id = frame.header.request_id();

        let Payload::NewMessage(submit) = Payload::from_frame(frame)? else {
            return Ok(());
        };

        let subscribed = self.state().registry.is_subscribed(conversation_id, session_id);
        if !subscribed {
            self.send_ack_failure(
                session_id,
                conversation_id,
                request_id,
                &submit.temp_id,
                "not subscribed to conversation",
            );
            return Ok(());
        }

        if submit.content.trim().is_empty() && submit.media.is_none() {
            self.send_ack_failure(
                session_id,
                conversation_id,
                request_id,
                &submit.temp_id,
                "message has no content and no media",
            );
            return Ok(());
        }

        // Serialization point: one submit at a time per conversation
        let submit_lock = self.submit_lock(conversation_id);
        let _guard = submit_lock.lock().await;

        let now_secs = self.env.wall_clock_secs();
        let draft = MessageDraft {
            sender: user.clone(),
            conversation_id,
            content: submit.content,
            media: submit.media,
            sent_at_secs: now_secs,
        };

        let mut envelope = match self.messages.create(draft).await {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(session_id, error = %e, "message persist failed");
                self.send_ack_failure(
                    session_id,
                    conversation_id,
                    request_id,
                    &submit.temp_id,
                    &format!("persistence error: {e}"),
                );
                return Ok(());
            },
        };

        // Preview pointer is best-effort; a failure never blocks fan-out
        if let Err(e) = self.conversations.set_latest_message(conversation_id, envelope.id).await {
            tracing::warn!(message_id = envelope.id, error = %e, "failed to update latest-message pointer");
        }

        // Fan-out then ack, enqueued under the state lock so every
        // subscriber observes submits in the same order
        let delivered: Vec<UserId> = {
            let state = self.state();

            let received = chat::MessageReceived { envelope: envelope.clone() };
            if let Some(broadcast) = build_frame(Payload::MessageReceived(received), |header| {
                header.set_conversation_id(conversation_id);
                header.set_sender_id(user.id);
                header.set_message_id(envelope.id);
                header.set_timestamp(now_secs);
            }) {
                for subscriber in state.registry.sessions_in(conversation_id).collect::<Vec<_>>() {
                    send_to(&state, subscriber, broadcast.clone());
                }
            }

            let ack = chat::MessageAck {
                success: true,
                saved_id: Some(envelope.id),
                temp_id: submit.temp_id.clone(),
                error: None,
            };
            if let Some(frame) = build_frame(Payload::MessageAck(ack), |header| {
                header.set_conversation_id(conversation_id);
                header.set_message_id(envelope.id);
                header.set_request_id(request_id);
            }) {
                send_to(&state, session_id, frame);
            }

            // Delivered set: every distinct subscribed user except the sender
            let mut recipients = state.registry.users_in(conversation_id);
            recipients.remove(&user.id);
            recipients.into_iter().collect()
        };

        tracing::debug!(
            message_id = envelope.id,
            sender_id = user.id,
            recipients = delivered.len(),
            "message fanned out"
        );

        if delivered.is_empty() {
            return Ok(());
        }

        for recipient in &delivered {
            envelope.mark_delivered(*recipient);
        }

        if let Err(e) = self.messages.save(&envelope).await {
            tracing::warn!(message_id = envelope.id, error = %e, "failed to persist delivered set");
        }

        {
            let state = self.state();
            let update = chat::MessageDelivered {
                message_id: envelope.id,
                delivered_to: envelope.delivered_to.clone(),
            };
            if let Some(broadcast) = build_frame(Payload::MessageDelivered(update), |header| {
                header.set_conversation_id(conversation_id);
                header.set_message_id(envelope.id);
            }) {
                for subscriber in state.registry.sessions_in(conversation_id).collect::<Vec<_>>() {
                    send_to(&state, subscriber, broadcast.clone());
                }
            }
        }

        Ok(())
    }

    /// Mark a message read. Idempotent: the store write only happens when
    /// the read set grows, but the status broadcast repeats every time so
    /// clients converge.
    async fn handle_mark_read(
        &self,
        session_id: SessionId,
        frame: &Frame,
    ) -> Result<(), EngineError> {
        let user = self.session_user(session_id)?;
        let request_id = frame.header.request_id();

        let Payload::MarkRead(mark) = Payload::from_frame(frame)? else {
            return Ok(());
        };

        let Some(mut envelope) = self.load_message(session_id, mark.message_id, request_id).await
        else {
            return Ok(());
        };

        let conversation_id = envelope.conversation_id;
        if !self.state().registry.is_subscribed(conversation_id, session_id) {
            self.send_error(
                session_id,
                ErrorPayload::not_subscribed(conversation_id),
                conversation_id,
                request_id,
            );
            return Ok(());
        }

        let grew = envelope.mark_read(user.id);
        if grew {
            if let Err(e) = self.messages.save(&envelope).await {
                tracing::warn!(message_id = envelope.id, error = %e, "failed to persist read set");
                self.send_error(
                    session_id,
                    ErrorPayload::persistence(e.to_string()),
                    conversation_id,
                    request_id,
                );
                return Ok(());
            }
        }

        let state = self.state();
        let update = chat::StatusUpdate { message_id: envelope.id, read_by: envelope.read_by.clone() };
        if let Some(broadcast) = build_frame(Payload::StatusUpdate(update), |header| {
            header.set_conversation_id(conversation_id);
            header.set_message_id(envelope.id);
        }) {
            for subscriber in state.registry.sessions_in(conversation_id).collect::<Vec<_>>() {
                send_to(&state, subscriber, broadcast.clone());
            }
        }

        Ok(())
    }

    /// Set a message's reaction. Single field, last write wins.
    async fn handle_react(&self, session_id: SessionId, frame: &Frame) -> Result<(), EngineError> {
        let user = self.session_user(session_id)?;
        let request_id = frame.header.request_id();

        let Payload::React(react) = Payload::from_frame(frame)? else {
            return Ok(());
        };

        let Some(mut envelope) = self.load_message(session_id, react.message_id, request_id).await
        else {
            return Ok(());
        };

        let conversation_id = envelope.conversation_id;
        if !self.state().registry.is_subscribed(conversation_id, session_id) {
            self.send_error(
                session_id,
                ErrorPayload::not_subscribed(conversation_id),
                conversation_id,
                request_id,
            );
            return Ok(());
        }

        envelope.set_reaction(react.reaction.clone());

        if let Err(e) = self.messages.save(&envelope).await {
            tracing::warn!(message_id = envelope.id, error = %e, "failed to persist reaction");
            self.send_error(
                session_id,
                ErrorPayload::persistence(e.to_string()),
                conversation_id,
                request_id,
            );
            return Ok(());
        }

        let state = self.state();
        let update = chat::ReactionUpdate {
            message_id: envelope.id,
            reaction: react.reaction,
            user_id: user.id,
        };
        if let Some(broadcast) = build_frame(Payload::ReactionUpdate(update), |header| {
            header.set_conversation_id(conversation_id);
            header.set_message_id(envelope.id);
            header.set_sender_id(user.id);
        }) {
            for subscriber in state.registry.sessions_in(conversation_id).collect::<Vec<_>>() {
                send_to(&state, subscriber, broadcast.clone());
            }
        }

        Ok(())
    }

    /// Relay a typing indicator to the other users in the conversation.
    ///
    /// Fire-and-forget: never persisted, never acked, silently dropped when
    /// the session is not subscribed.
    fn handle_typing(&self, session_id: SessionId, frame: &Frame) -> Result<(), EngineError> {
        let user = self.session_user(session_id)?;
        let conversation_id = frame.header.conversation_id();
        let stop = frame.header.opcode_enum() == Some(Opcode::StopTyping);

        let state = self.state();
        if !state.registry.is_subscribed(conversation_id, session_id) {
            return Ok(());
        }

        let typing = events::Typing { user_id: user.id, username: user.username.clone() };
        let payload = if stop { Payload::StopTyping(typing) } else { Payload::Typing(typing) };

        if let Some(relay) = build_frame(payload, |header| {
            header.set_conversation_id(conversation_id);
            header.set_sender_id(user.id);
        }) {
            for subscriber in state.registry.sessions_in(conversation_id).collect::<Vec<_>>() {
                // All of the originating user's sessions are excluded, not
                // just the one that sent the indicator
                if state.registry.user_of(subscriber) == Some(user.id) {
                    continue;
                }
                send_to(&state, subscriber, relay.clone());
            }
        }

        Ok(())
    }

    async fn load_message(
        &self,
        session_id: SessionId,
        message_id: u64,
        request_id: u32,
    ) -> Option<palaver_proto::types::MessageEnvelope> {
        match self.messages.load(message_id).await {
            Ok(Some(envelope)) => Some(envelope),
            Ok(None) => {
                let error = ErrorPayload {
                    code: ErrorPayload::NOT_FOUND,
                    message: format!("message not found: {message_id}"),
                    retry_after: None,
                };
                self.send_error(session_id, error, 0, request_id);
                None
            },
            Err(e) => {
                tracing::warn!(message_id, error = %e, "message load failed");
                self.send_error(session_id, ErrorPayload::persistence(e.to_string()), 0, request_id);
                None
            },
        }
    }
}

/// Build a frame from a payload, with header customization.
///
/// Encoding a payload we constructed ourselves cannot realistically fail;
/// if it does, log and drop rather than killing the session.
fn build_frame(payload: Payload, configure: impl FnOnce(&mut FrameHeader)) -> Option<Frame> {
    let mut header = FrameHeader::new(payload.opcode());
    configure(&mut header);

    match payload.into_frame(header) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode outbound frame");
            None
        },
    }
}

fn send_to<I>(state: &EngineState<I>, session_id: SessionId, frame: Frame)
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    if let Some(entry) = state.sessions.get(&session_id) {
        if entry.outbound.send(frame).is_err() {
            tracing::debug!(session_id, "outbound queue closed");
        }
    }
}

fn broadcast_presence<I>(
    state: &EngineState<I>,
    user_id: UserId,
    is_online: bool,
    last_seen_secs: Option<u64>,
) where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    let update = events::PresenceUpdate { user_id, is_online, last_seen_secs };
    let Some(frame) = build_frame(Payload::PresenceUpdate(update), |header| {
        header.set_sender_id(user_id);
        if let Some(secs) = last_seen_secs {
            header.set_timestamp(secs);
        }
    }) else {
        return;
    };

    for (session_id, entry) in &state.sessions {
        if entry.outbound.send(frame.clone()).is_err() {
            tracing::debug!(session_id, "outbound queue closed during presence broadcast");
        }
    }
}
