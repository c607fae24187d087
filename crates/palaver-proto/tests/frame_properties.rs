//! Property-based tests for Frame encoding/decoding
//!
//! These tests verify that frame serialization is correct for ALL valid
//! inputs, not just specific examples. Uses proptest to generate arbitrary
//! frames and verify round-trip properties.

use bytes::Bytes;
use palaver_proto::{Frame, FrameHeader, Opcode};
use proptest::prelude::*;

/// Strategy for generating arbitrary opcodes
fn arbitrary_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        Just(Opcode::Auth),
        Just(Opcode::AuthOk),
        Just(Opcode::Goodbye),
        Just(Opcode::Ping),
        Just(Opcode::Pong),
        Just(Opcode::JoinChannel),
        Just(Opcode::JoinAck),
        Just(Opcode::LeaveChannel),
        Just(Opcode::NewMessage),
        Just(Opcode::MessageAck),
        Just(Opcode::MessageReceived),
        Just(Opcode::MessageDelivered),
        Just(Opcode::MarkRead),
        Just(Opcode::StatusUpdate),
        Just(Opcode::React),
        Just(Opcode::ReactionUpdate),
        Just(Opcode::Typing),
        Just(Opcode::StopTyping),
        Just(Opcode::PresenceUpdate),
        Just(Opcode::Error),
    ]
}

/// Strategy for generating arbitrary frame headers
fn arbitrary_header() -> impl Strategy<Value = FrameHeader> {
    (
        arbitrary_opcode(),
        any::<u128>(), // conversation_id
        any::<u64>(),  // sender_id
        any::<u64>(),  // message_id
        any::<u64>(),  // timestamp
    )
        .prop_map(|(opcode, conversation_id, sender_id, message_id, timestamp)| {
            let mut header = FrameHeader::new(opcode);
            header.set_conversation_id(conversation_id);
            header.set_sender_id(sender_id);
            header.set_message_id(message_id);
            header.set_timestamp(timestamp);
            header
        })
}

/// Strategy for generating arbitrary frames with payloads
fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    (
        arbitrary_header(),
        prop::collection::vec(any::<u8>(), 0..1024), // payload up to 1KB
    )
        .prop_map(|(header, payload)| Frame::new(header, Bytes::from(payload)))
}

#[test]
fn prop_frame_encode_decode_roundtrip() {
    proptest!(|(frame in arbitrary_frame())| {
        let mut buf = Vec::new();
        frame.encode(&mut buf).expect("encode should succeed");

        let decoded = Frame::decode(&buf).expect("decode should succeed");

        // PROPERTY: Round-trip must be identity
        prop_assert_eq!(decoded.header, frame.header, "Header mismatch after round-trip");
        prop_assert_eq!(decoded.payload, frame.payload, "Payload content mismatch");
    });
}

#[test]
fn prop_frame_header_roundtrip() {
    proptest!(|(header in arbitrary_header())| {
        let bytes = header.to_bytes();

        let decoded = FrameHeader::from_bytes(&bytes).expect("from_bytes should succeed");

        // PROPERTY: Header round-trip must be identity
        prop_assert_eq!(decoded.opcode(), header.opcode(), "Opcode mismatch");
        prop_assert_eq!(
            decoded.conversation_id(),
            header.conversation_id(),
            "Conversation ID mismatch"
        );
        prop_assert_eq!(decoded.sender_id(), header.sender_id(), "Sender ID mismatch");
        prop_assert_eq!(decoded.message_id(), header.message_id(), "Message ID mismatch");
        prop_assert_eq!(decoded.timestamp(), header.timestamp(), "Timestamp mismatch");
        prop_assert_eq!(decoded.payload_size(), header.payload_size(), "Payload size mismatch");
    });
}

#[test]
fn prop_frame_empty_payload() {
    proptest!(|(header in arbitrary_header())| {
        let frame = Frame::new(header, Bytes::new());

        let mut buf = Vec::new();
        frame.encode(&mut buf).expect("encode should succeed");

        let decoded = Frame::decode(&buf).expect("decode should succeed");

        // PROPERTY: Empty payload preserved
        prop_assert_eq!(decoded.payload.len(), 0, "Empty payload should remain empty");
        prop_assert_eq!(decoded.header.payload_size(), 0, "Header should show 0 payload");
    });
}

#[test]
fn prop_frame_opcode_preservation() {
    proptest!(|(opcode in arbitrary_opcode())| {
        let mut header = FrameHeader::new(opcode);
        header.set_conversation_id(1);

        let frame = Frame::new(header, Bytes::new());

        let mut buf = Vec::new();
        frame.encode(&mut buf).expect("encode should succeed");

        let decoded = Frame::decode(&buf).expect("decode should succeed");

        // PROPERTY: Opcode must be preserved exactly
        prop_assert_eq!(
            decoded.header.opcode_enum(),
            Some(opcode),
            "Opcode not preserved: expected {:?}, got {:?}",
            opcode,
            decoded.header.opcode_enum()
        );
    });
}

#[test]
fn prop_frame_encoded_size_correct() {
    proptest!(|(frame in arbitrary_frame())| {
        let mut buf = Vec::new();
        frame.encode(&mut buf).expect("encode should succeed");

        // PROPERTY: Encoded size must equal header size + payload size
        let expected_size = FrameHeader::SIZE + frame.payload.len();
        prop_assert_eq!(
            buf.len(),
            expected_size,
            "Encoded size mismatch: expected {}, got {}",
            expected_size,
            buf.len()
        );
    });
}
