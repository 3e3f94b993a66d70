// File: chatsync-common/src/models/mod.rs
pub mod message;
pub mod cache;

pub use message::{Message, MessageStatus, ServerMessage};
pub use cache::{
    CacheConfig, CacheSnapshot, PendingEviction, PersistedCache, TrimPolicy,
};
