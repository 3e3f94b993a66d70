// File: chatsync-core/src/test_utils/helpers.rs

use std::sync::Arc;

use chatsync_common::models::{CacheConfig, ServerMessage, TrimPolicy};
use chatsync_common::traits::KeyValueStore;

use crate::Error;
use crate::repositories::MemoryStore;
use crate::services::ChatSyncService;

/// Shorthand for an assistant message payload.
pub fn server_msg(id: &str, content: &str) -> ServerMessage {
    ServerMessage::new(id, content, false)
}

/// `count` assistant payloads with ids `{prefix}0..{prefix}{count-1}`.
pub fn server_msgs(prefix: &str, count: usize) -> Vec<ServerMessage> {
    (0..count)
        .map(|i| server_msg(&format!("{prefix}{i}"), &format!("message {i}")))
        .collect()
}

/// Config with a custom cap and otherwise default settings.
pub fn config_with_cap(max_total_messages: usize) -> CacheConfig {
    CacheConfig {
        trim_policy: TrimPolicy {
            max_total_messages,
            ..TrimPolicy::default()
        },
        ..CacheConfig::default()
    }
}

/// A service over a fresh `MemoryStore`, returning the store too so tests
/// can reopen a second session on it.
pub fn memory_backed_service(config: CacheConfig) -> (ChatSyncService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = ChatSyncService::create(store.clone(), config);
    (service, store)
}

/// Store whose every operation fails.
#[derive(Debug, Default, Clone)]
pub struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<String>, Error> {
        Err(Error::Storage("storage unavailable".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), Error> {
        Err(Error::Storage("storage unavailable".into()))
    }

    fn remove(&self, _key: &str) -> Result<(), Error> {
        Err(Error::Storage("storage unavailable".into()))
    }
}
