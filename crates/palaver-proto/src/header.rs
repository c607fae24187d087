//! Frame header implementation with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 64-byte structure serialized as raw binary
//! (Big Endian). The engine routes frames on header fields alone, so the
//! payload is never deserialized on the hot path.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 64-byte frame header (Big Endian network byte order)
///
/// All multi-byte integers are stored in Big Endian format to match network
/// byte order. Fields are stored as raw byte arrays to avoid alignment issues.
///
/// The header fits a single 64-byte CPU cache line: the dispatcher can decide
/// the target conversation, sender, and message without touching the payload.
///
/// # Security
///
/// The `#[repr(C, packed)]` layout with zerocopy traits ensures this struct
/// can be safely cast from untrusted network bytes - all 64-byte patterns are
/// valid, preventing undefined behavior. Header fields are advisory until the
/// connection is authenticated; the engine binds `sender_id` to the verified
/// identity and ignores client-supplied values after that point.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    // Protocol identification (8 bytes: 0-7)
    magic: [u8; 4],             // 0x504C5652 ("PLVR" in ASCII)
    version: u8,                // 0x01
    reserved: u8,               // must be zero
    pub(crate) opcode: [u8; 2], // u16 operation code

    // Request/payload metadata (8 bytes: 8-15)
    request_id: [u8; 4], // u32 client nonce for ack correlation
    pub(crate) payload_size: [u8; 4], // u32 payload length

    // Routing context (24 bytes: 16-39)
    conversation_id: [u8; 16], // UUID (128-bit)
    sender_id: [u8; 8],        // u64 sender identifier

    // Message context (16 bytes: 40-55)
    message_id: [u8; 8], // u64 server-assigned message id (0 if n/a)
    timestamp: [u8; 8],  // u64 Unix seconds, server-stamped

    // Padding to the cache line boundary (8 bytes: 56-63)
    reserved2: [u8; 8],
}

impl FrameHeader {
    /// Size of the serialized header (64 bytes)
    pub const SIZE: usize = 64;

    /// Magic number: "PLVR" in ASCII (0x504C5652)
    pub const MAGIC: u32 = 0x504C_5652;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (16 MB)
    pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

    /// Create a new header with the specified opcode.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&Self::MAGIC.to_be_bytes());
        bytes[4] = Self::VERSION;
        bytes[6..8].copy_from_slice(&opcode.to_u16().to_be_bytes());

        // We just constructed valid bytes with correct magic and version,
        // so from_bytes validates and returns a valid header.
        Self::from_bytes(&bytes)
            .ok()
            .unwrap_or_else(|| unreachable!("constructed valid header with correct magic/version"))
            .to_owned()
    }

    /// Parse header from network bytes (zero-copy, safe)
    ///
    /// Casts raw bytes directly to a `FrameHeader` reference using
    /// compile-time layout verification from `zerocopy`. No data is copied.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if buffer is shorter than 64 bytes
    /// - `ProtocolError::InvalidMagic` if magic number is invalid
    /// - `ProtocolError::UnsupportedVersion` if protocol version is unsupported
    /// - `ProtocolError::PayloadTooLarge` if payload size exceeds maximum
    ///
    /// # Security
    ///
    /// All bit patterns are valid (no invalid representations), so casting
    /// arbitrary bytes cannot cause undefined behavior. Validation is ordered
    /// cheapest first (size, magic) to fail fast on garbage data.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes (zero-copy)
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Protocol magic number (0x504C5652 = "PLVR").
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Protocol version byte (currently 0x01).
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Operation code as raw u16.
    #[must_use]
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Operation code as enum. `None` if unrecognized.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Client-assigned nonce for request/response correlation.
    #[must_use]
    pub fn request_id(&self) -> u32 {
        u32::from_be_bytes(self.request_id)
    }

    /// 128-bit conversation UUID.
    #[must_use]
    pub fn conversation_id(&self) -> u128 {
        u128::from_be_bytes(self.conversation_id)
    }

    /// Stable sender identifier (bound by the server after authentication).
    #[must_use]
    pub fn sender_id(&self) -> u64 {
        u64::from_be_bytes(self.sender_id)
    }

    /// Server-assigned message id. Zero when the frame carries no message
    /// context.
    #[must_use]
    pub fn message_id(&self) -> u64 {
        u64::from_be_bytes(self.message_id)
    }

    /// Server timestamp in Unix seconds.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        u64::from_be_bytes(self.timestamp)
    }

    /// Payload size in bytes (max 16 MB).
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Update conversation UUID.
    pub fn set_conversation_id(&mut self, conversation_id: u128) {
        self.conversation_id = conversation_id.to_be_bytes();
    }

    /// Update sender identifier.
    pub fn set_sender_id(&mut self, sender_id: u64) {
        self.sender_id = sender_id.to_be_bytes();
    }

    /// Update message id.
    pub fn set_message_id(&mut self, message_id: u64) {
        self.message_id = message_id.to_be_bytes();
    }

    /// Set server timestamp (Unix seconds).
    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp.to_be_bytes();
    }

    /// Set client request nonce for response correlation.
    pub fn set_request_id(&mut self, request_id: u32) {
        self.request_id = request_id.to_be_bytes();
    }

    /// Set payload size.
    pub fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size.to_be_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("version", &self.version())
            .field("opcode", &format!("{:#06x}", self.opcode()))
            .field("request_id", &self.request_id())
            .field("conversation_id", &format!("{:#034x}", self.conversation_id()))
            .field("sender_id", &self.sender_id())
            .field("message_id", &self.message_id())
            .field("timestamp", &self.timestamp())
            .field("payload_size", &self.payload_size())
            .finish_non_exhaustive()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}
