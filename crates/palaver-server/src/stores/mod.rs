//! Store implementations.
//!
//! In-memory stores back local development and the test suite. Production
//! deployments implement the same traits against a real database.

pub mod memory;

pub use memory::{MemoryConversationStore, MemoryMessageStore, MemoryUserStore};
