// File: src/cache/mod.rs

pub mod arena;
pub mod message_cache;
pub mod persistence;

pub use arena::{Handle, MessageArena, Phase};
pub use message_cache::MessageCache;
pub use persistence::SnapshotStore;
pub use chatsync_common::models::{
    CacheConfig,
    CacheSnapshot,
    PendingEviction,
    TrimPolicy,
};
