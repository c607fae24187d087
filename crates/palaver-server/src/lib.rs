//! Palaver production server.
//!
//! Glue between the [`engine::Engine`] and the real world: Quinn QUIC
//! transport, Tokio runtime, system clocks, and OS randomness.
//!
//! # Per-connection wiring
//!
//! Each accepted QUIC connection gets a random session id and one
//! server-initiated unidirectional stream. The engine's outbound queue for
//! that session is pumped to the stream by a dedicated writer task, so
//! frames reach the client exactly in enqueue order. Inbound frames arrive
//! on client-initiated bidirectional streams and are fed to
//! [`engine::Engine::handle_frame`]; a fatal engine error closes the whole
//! connection.

pub mod auth;
pub mod engine;
mod error;
pub mod presence;
pub mod registry;
pub mod stores;
mod system_env;
mod transport;

use std::{sync::Arc, time::Duration};

use palaver_core::{
    Environment,
    store::{Authenticator, ConversationStore, MessageStore, UserStore},
};
use palaver_proto::{Frame, FrameHeader};
use tokio::{io::AsyncReadExt, sync::mpsc};

pub use auth::{TokenAuthenticator, mint_token};
pub use engine::{Engine, EngineConfig, EngineError};
pub use error::ServerError;
pub use presence::{PresenceTracker, PresenceTransition};
pub use registry::SubscriptionRegistry;
pub use system_env::SystemEnv;
pub use transport::{ClientConnection, QuicTransport};

/// Server runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind (e.g. "0.0.0.0:4433")
    pub bind_address: String,
    /// TLS certificate path (PEM). Self-signed when absent.
    pub cert_path: Option<String>,
    /// TLS private key path (PEM)
    pub key_path: Option<String>,
    /// Engine limits and timeouts
    pub engine: EngineConfig,
    /// Interval between engine maintenance ticks
    pub tick_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            engine: EngineConfig::default(),
            tick_interval: Duration::from_secs(5),
        }
    }
}

/// Production server: engine plus QUIC transport.
pub struct Server {
    engine: Arc<Engine<SystemEnv>>,
    transport: QuicTransport,
    env: SystemEnv,
    tick_interval: Duration,
}

impl Server {
    /// Bind the transport and wire the engine to its collaborators.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` / `ServerError::Transport` if binding fails
    pub fn bind(
        config: ServerConfig,
        authenticator: Arc<dyn Authenticator>,
        users: Arc<dyn UserStore>,
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let engine = Arc::new(Engine::new(
            env.clone(),
            config.engine,
            authenticator,
            users,
            conversations,
            messages,
        ));

        let transport = QuicTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self { engine, transport, env, tick_interval: config.tick_interval })
    }

    /// Accept connections until the endpoint closes.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.transport.local_addr()?, "server started");

        let tick_engine = Arc::clone(&self.engine);
        let tick_env = self.env.clone();
        let tick_interval = self.tick_interval;
        tokio::spawn(async move {
            loop {
                tick_env.sleep(tick_interval).await;
                tick_engine.tick().await;
            }
        });

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let engine = Arc::clone(&self.engine);
                    let env = self.env.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, engine, env).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                },
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                },
            }
        }
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }
}

async fn handle_connection(
    conn: ClientConnection,
    engine: Arc<Engine<SystemEnv>>,
    env: SystemEnv,
) -> Result<(), ServerError> {
    let session_id = env.random_u64();

    let outbound = match engine.connect(session_id) {
        Ok(rx) => rx,
        Err(e) => {
            conn.close(1u32.into(), b"server full");
            return Err(ServerError::Engine(e.to_string()));
        },
    };

    tracing::debug!(session_id, remote = %conn.remote_addr(), "connection accepted");

    let writer = conn.open_uni().await?;
    let writer_task = tokio::spawn(pump_outbound(session_id, writer, outbound, conn.clone()));

    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                drop(send);

                let engine = Arc::clone(&engine);
                let conn = conn.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_stream(session_id, recv, &engine).await {
                        tracing::debug!(session_id, error = %e, "fatal stream error, closing");
                        conn.close(2u32.into(), e.to_string().as_bytes());
                    }
                });
            },
            Err(e) => {
                tracing::debug!(session_id, error = %e, "connection closed");
                break;
            },
        }
    }

    engine.disconnect(session_id).await;
    writer_task.abort();

    Ok(())
}

/// Read frames off one inbound stream and feed them to the engine.
async fn handle_stream(
    session_id: u64,
    mut recv: quinn::RecvStream,
    engine: &Engine<SystemEnv>,
) -> Result<(), ServerError> {
    while let Some(frame) = read_frame(&mut recv).await? {
        engine
            .handle_frame(session_id, frame)
            .await
            .map_err(|e| ServerError::Engine(e.to_string()))?;
    }
    Ok(())
}

/// Read one length-prefixed frame: fixed 64-byte header, then exactly
/// `payload_size` bytes.
///
/// Returns `None` only when the stream ends cleanly on a frame boundary.
/// A stream that ends or resets mid-header is a transport error, same as a
/// truncated payload.
async fn read_frame<R>(recv: &mut R) -> Result<Option<Frame>, ServerError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut header_buf = [0u8; FrameHeader::SIZE];
    let mut filled = 0;
    while filled < header_buf.len() {
        let n = recv
            .read(&mut header_buf[filled..])
            .await
            .map_err(|e| ServerError::Transport(format!("header read failed: {e}")))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ServerError::Transport(format!(
                "stream ended mid-header after {filled} bytes"
            )));
        }
        filled += n;
    }

    let header = *FrameHeader::from_bytes(&header_buf)?;

    let payload_size = header.payload_size() as usize;
    let mut payload = vec![0u8; payload_size];
    if payload_size > 0 {
        recv.read_exact(&mut payload)
            .await
            .map_err(|e| ServerError::Transport(format!("truncated payload: {e}")))?;
    }

    Ok(Some(Frame::new(header, payload)))
}

/// Drain a session's outbound queue to its unidirectional stream.
///
/// The queue closes when the engine drops the session (Goodbye, auth grace
/// expiry, idle timeout), and that must reach the wire: the peer's QUIC
/// connection is closed here, otherwise an engine-side teardown would leave
/// the transport open indefinitely. The stream breaking first just ends the
/// task; the close is a no-op on an already-dead connection.
async fn pump_outbound(
    session_id: u64,
    mut stream: quinn::SendStream,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    conn: ClientConnection,
) {
    let mut buf = Vec::with_capacity(4096);

    while let Some(frame) = outbound.recv().await {
        buf.clear();
        if let Err(e) = frame.encode(&mut buf) {
            tracing::error!(session_id, error = %e, "outbound frame encode failed");
            continue;
        }

        if let Err(e) = stream.write_all(&buf).await {
            tracing::debug!(session_id, error = %e, "outbound stream closed");
            break;
        }
    }

    tracing::debug!(session_id, "outbound queue ended, closing connection");
    conn.close(3u32.into(), b"session closed");
}

#[cfg(test)]
mod tests {
    use palaver_proto::{Payload, payloads::session};

    use super::*;

    fn goodbye_bytes() -> Vec<u8> {
        let payload = Payload::Goodbye(session::Goodbye { reason: "bye".to_string() });
        let header = FrameHeader::new(payload.opcode());
        let frame = payload.into_frame(header).unwrap();

        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();
        buf
    }

    #[tokio::test]
    async fn read_frame_round_trips_then_ends_cleanly() {
        let bytes = goodbye_bytes();
        let mut stream: &[u8] = &bytes;

        let frame = read_frame(&mut stream).await.unwrap().expect("one frame");
        match Payload::from_frame(&frame).unwrap() {
            Payload::Goodbye(goodbye) => assert_eq!(goodbye.reason, "bye"),
            other => panic!("expected Goodbye, got {other:?}"),
        }

        assert!(read_frame(&mut stream).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_frame_none_on_empty_stream() {
        let mut stream: &[u8] = &[];
        assert!(read_frame(&mut stream).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_frame_rejects_partial_header() {
        let bytes = goodbye_bytes();
        let mut stream: &[u8] = &bytes[..FrameHeader::SIZE / 2];

        let err = read_frame(&mut stream).await.unwrap_err();
        assert!(matches!(err, ServerError::Transport(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn read_frame_rejects_truncated_payload() {
        let bytes = goodbye_bytes();
        assert!(bytes.len() > FrameHeader::SIZE);
        let mut stream: &[u8] = &bytes[..bytes.len() - 1];

        let err = read_frame(&mut stream).await.unwrap_err();
        assert!(matches!(err, ServerError::Transport(_)), "got {err:?}");
    }
}
