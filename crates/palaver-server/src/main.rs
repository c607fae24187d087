//! Palaver server binary.

use std::sync::Arc;

use clap::Parser;
use ed25519_dalek::{SigningKey, VerifyingKey};
use palaver_core::{
    Environment,
    store::{ConversationStore, MessageStore, UserStore},
};
use palaver_proto::types::UserIdentity;
use palaver_server::{
    Server, ServerConfig, SystemEnv, TokenAuthenticator, mint_token,
    stores::{MemoryConversationStore, MemoryMessageStore, MemoryUserStore},
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Presence and realtime fan-out server.
#[derive(Parser, Debug)]
#[command(name = "palaver-server", version, about)]
struct Args {
    /// Address to bind (host:port)
    #[arg(long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// TLS certificate path (PEM). Self-signed if omitted.
    #[arg(long)]
    cert: Option<String>,

    /// TLS private key path (PEM)
    #[arg(long)]
    key: Option<String>,

    /// Hex-encoded Ed25519 public key for verifying bearer tokens.
    /// An ephemeral dev keypair with fixture data is generated if omitted.
    #[arg(long)]
    auth_public_key: Option<String>,

    /// Maximum concurrent sessions
    #[arg(long, default_value_t = 10_000)]
    max_connections: usize,

    /// Log filter (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log)))
        .init();

    let users = Arc::new(MemoryUserStore::new());
    let conversations = Arc::new(MemoryConversationStore::new());
    let messages = Arc::new(MemoryMessageStore::new());

    let verifying_key = match &args.auth_public_key {
        Some(hex_key) => parse_verifying_key(hex_key)?,
        None => {
            let mut seed = [0u8; 32];
            getrandom::fill(&mut seed)?;
            let signing_key = SigningKey::from_bytes(&seed);
            seed_dev_fixtures(&users, &conversations, &signing_key);
            signing_key.verifying_key()
        },
    };

    let users_dyn: Arc<dyn UserStore> = users;
    let conversations_dyn: Arc<dyn ConversationStore> = conversations;
    let messages_dyn: Arc<dyn MessageStore> = messages;

    let authenticator =
        Arc::new(TokenAuthenticator::new(verifying_key, Arc::clone(&users_dyn)));

    let config = ServerConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        engine: palaver_server::EngineConfig {
            max_connections: args.max_connections,
            ..Default::default()
        },
        ..Default::default()
    };

    let server = Server::bind(config, authenticator, users_dyn, conversations_dyn, messages_dyn)?;
    server.run().await?;

    Ok(())
}

fn parse_verifying_key(hex_key: &str) -> Result<VerifyingKey, Box<dyn std::error::Error>> {
    let bytes = hex::decode(hex_key.trim())?;
    let arr: [u8; 32] =
        bytes.as_slice().try_into().map_err(|_| "public key must be 32 bytes of hex")?;
    Ok(VerifyingKey::from_bytes(&arr)?)
}

/// Seed a demo user and conversation so a fresh dev server is usable.
fn seed_dev_fixtures(
    users: &MemoryUserStore,
    conversations: &MemoryConversationStore,
    signing_key: &SigningKey,
) {
    users.add_user(UserIdentity { id: 1, username: "demo".to_string(), avatar: None });
    conversations.add_conversation(1, [1]);

    let expires = SystemEnv::new().wall_clock_secs() + 24 * 60 * 60;
    let token = mint_token(signing_key, 1, expires);
    tracing::warn!("ephemeral auth keypair in use; demo token (user 1, conversation 1): {token}");
}
