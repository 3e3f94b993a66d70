// src/lib.rs

pub mod cache;
pub mod eventbus;
pub mod repositories;
pub mod services;
pub mod test_utils;
pub mod utils;

pub use chatsync_common::error::Error;
pub use cache::{MessageArena, MessageCache, SnapshotStore};
pub use eventbus::{CacheEvent, CacheEventBus, Subscription};
pub use repositories::{FileStore, MemoryStore};
pub use services::ChatSyncService;
