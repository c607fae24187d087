//! Concurrent submit ordering.
//!
//! Several senders submit to the same conversation from parallel tasks. The
//! per-conversation serialization point must make every subscriber observe
//! the accepted messages in one identical order.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use palaver_core::store::{Authenticator, ConversationStore, MessageStore, UserStore};
use palaver_proto::{
    Frame, FrameHeader, Payload,
    payloads::{chat, session},
    types::{ConversationId, MessageId, SessionId, UserId, UserIdentity},
};
use palaver_server::{
    Engine, EngineConfig, SystemEnv, TokenAuthenticator, mint_token,
    stores::{MemoryConversationStore, MemoryMessageStore, MemoryUserStore},
};
use tokio::sync::mpsc;

const CONV: ConversationId = 0xFA_0001;
const FAR_FUTURE: u64 = 4_102_444_800;
const SENDERS: u64 = 3;
const MESSAGES_PER_SENDER: usize = 10;

fn build_engine(signing_key: &SigningKey, user_ids: &[UserId]) -> Arc<Engine<SystemEnv>> {
    let users = Arc::new(MemoryUserStore::new());
    let conversations = Arc::new(MemoryConversationStore::new());
    let messages = Arc::new(MemoryMessageStore::new());

    for &user_id in user_ids {
        users.add_user(UserIdentity {
            id: user_id,
            username: format!("user-{user_id}"),
            avatar: None,
        });
    }
    conversations.add_conversation(CONV, user_ids.iter().copied());

    let users_dyn: Arc<dyn UserStore> = users;
    let authenticator: Arc<dyn Authenticator> =
        Arc::new(TokenAuthenticator::new(signing_key.verifying_key(), users_dyn.clone()));
    let conversations_dyn: Arc<dyn ConversationStore> = conversations;
    let messages_dyn: Arc<dyn MessageStore> = messages;

    Arc::new(Engine::new(
        SystemEnv::new(),
        EngineConfig::default(),
        authenticator,
        users_dyn,
        conversations_dyn,
        messages_dyn,
    ))
}

async fn join_session(
    engine: &Engine<SystemEnv>,
    signing_key: &SigningKey,
    session_id: SessionId,
    user_id: UserId,
) -> mpsc::UnboundedReceiver<Frame> {
    let rx = engine.connect(session_id).unwrap();

    let token = mint_token(signing_key, user_id, FAR_FUTURE);
    let auth = Payload::Auth(session::Auth { credential: Some(token) })
        .into_frame(FrameHeader::new(palaver_proto::Opcode::Auth))
        .unwrap();
    engine.handle_frame(session_id, auth).await.unwrap();

    let mut header = FrameHeader::new(palaver_proto::Opcode::JoinChannel);
    header.set_conversation_id(CONV);
    let join = Payload::JoinChannel(chat::JoinChannel::default()).into_frame(header).unwrap();
    engine.handle_frame(session_id, join).await.unwrap();

    rx
}

fn received_ids(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<MessageId> {
    let mut ids = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let Ok(Payload::MessageReceived(received)) = Payload::from_frame(&frame) {
            ids.push(received.envelope.id);
        }
    }
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_observe_identical_order() {
    let signing_key = SigningKey::from_bytes(&[7u8; 32]);

    // Users 1..=3 send, user 9 only observes
    let user_ids: Vec<UserId> = (1..=SENDERS).chain(std::iter::once(9)).collect();
    let engine = build_engine(&signing_key, &user_ids);

    let mut receivers = Vec::new();
    for user_id in 1..=SENDERS {
        let rx = join_session(&engine, &signing_key, 100 + user_id, user_id).await;
        receivers.push(rx);
    }
    let observer_rx = join_session(&engine, &signing_key, 900, 9).await;
    receivers.push(observer_rx);

    let mut tasks = Vec::new();
    for user_id in 1..=SENDERS {
        let engine = Arc::clone(&engine);
        let session_id = 100 + user_id;

        tasks.push(tokio::spawn(async move {
            for i in 0..MESSAGES_PER_SENDER {
                let mut header = FrameHeader::new(palaver_proto::Opcode::NewMessage);
                header.set_conversation_id(CONV);

                let submit = Payload::NewMessage(chat::NewMessage {
                    content: format!("sender {user_id} message {i}"),
                    media: None,
                    temp_id: format!("{user_id}-{i}"),
                })
                .into_frame(header)
                .unwrap();

                engine.handle_frame(session_id, submit).await.unwrap();
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    let expected_total = SENDERS as usize * MESSAGES_PER_SENDER;
    let orders: Vec<Vec<MessageId>> =
        receivers.iter_mut().map(received_ids).collect();

    for (i, order) in orders.iter().enumerate() {
        assert_eq!(order.len(), expected_total, "receiver {i} missed messages");
        assert_eq!(order, &orders[0], "receiver {i} observed a different order");
    }

    // Ids are unique: no message was fanned out twice
    let mut sorted = orders[0].clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), expected_total);
}
