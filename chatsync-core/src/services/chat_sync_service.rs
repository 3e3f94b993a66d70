use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use chatsync_common::models::{CacheConfig, CacheSnapshot, Message, ServerMessage};
use chatsync_common::traits::KeyValueStore;

use crate::cache::{MessageCache, SnapshotStore};
use crate::eventbus::{CacheEvent, CacheEventBus, Subscription};

/// One chat session's message cache plus its persistence and observers.
///
/// Each mutating call runs to completion before returning:
///  1. the cache applies the change and reports a `CacheEvent` (or nothing),
///  2. the new state is written to the store,
///  3. observers are notified.
///
/// Storage failures are logged and never reach the caller. After a failed
/// write the session stops persisting and keeps working in memory.
pub struct ChatSyncService {
    cache: MessageCache,
    persistence: Option<SnapshotStore>,
    persistence_degraded: bool,
    bus: CacheEventBus,
    config: CacheConfig,
}

impl ChatSyncService {
    /// Opens a session backed by `store`, restoring whatever was persisted
    /// under `config.storage_key`. Unreadable state falls back to empty.
    pub fn create(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        let persistence = SnapshotStore::new(store, config.storage_key.clone());
        let cache = match persistence.load() {
            Ok(Some(persisted)) => MessageCache::restore(persisted, config.trim_policy.clone()),
            Ok(None) => MessageCache::new(config.trim_policy.clone()),
            Err(e) => {
                warn!(
                    "Ignoring unreadable cache under '{}': {}",
                    persistence.key(),
                    e
                );
                MessageCache::new(config.trim_policy.clone())
            }
        };
        Self {
            cache,
            persistence: Some(persistence),
            persistence_degraded: false,
            bus: CacheEventBus::new(),
            config,
        }
    }

    /// A session without durable storage.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self {
            cache: MessageCache::new(config.trim_policy.clone()),
            persistence: None,
            persistence_degraded: false,
            bus: CacheEventBus::new(),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    pub fn event_bus(&self) -> &CacheEventBus {
        &self.bus
    }

    /// True once a storage write has failed this session.
    pub fn is_persistence_degraded(&self) -> bool {
        self.persistence_degraded
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CacheSnapshot) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    pub fn subscribe_events(&self, buffer_size: Option<usize>) -> mpsc::Receiver<CacheEvent> {
        self.bus.subscribe_events(buffer_size)
    }

    pub fn add_optimistic_message(&mut self, content: impl Into<String>) -> String {
        let (temp_id, event) = self.cache.add_optimistic_message(content);
        self.commit(event);
        temp_id
    }

    pub fn confirm_message(&mut self, temp_id: &str, server_message: ServerMessage) {
        if let Some(event) = self.cache.confirm_message(temp_id, server_message) {
            self.commit(event);
        }
    }

    pub fn mark_message_failed(&mut self, temp_id: &str) {
        if let Some(event) = self.cache.mark_message_failed(temp_id) {
            self.commit(event);
        }
    }

    /// Returns the message to resend, or `None` if `temp_id` is not a
    /// failed pending message.
    pub fn retry_message(&mut self, temp_id: &str) -> Option<Message> {
        let (message, event) = self.cache.retry_message(temp_id)?;
        self.commit(event);
        Some(message)
    }

    pub fn add_received_message(&mut self, message: ServerMessage) {
        if let Some(event) = self.cache.add_received_message(message) {
            self.commit(event);
        }
    }

    pub fn add_history_messages(
        &mut self,
        messages: Vec<ServerMessage>,
        has_more: bool,
        page: u32,
        append: bool,
    ) {
        let event = self.cache.add_history_messages(messages, has_more, page, append);
        self.commit(event);
    }

    pub fn set_loading(&mut self, loading: bool) {
        let event = self.cache.set_loading(loading);
        self.commit(event);
    }

    pub fn set_loading_more(&mut self, loading: bool) {
        let event = self.cache.set_loading_more(loading);
        self.commit(event);
    }

    /// Empties the cache, deletes the persisted copy and notifies observers.
    pub fn clear_all(&mut self) {
        let event = self.cache.clear_all();
        self.commit(event);
    }

    pub fn get_message(&self, ident: &str) -> Option<&Message> {
        self.cache.get_message(ident)
    }

    pub fn get_messages_for_render(&self) -> Vec<Message> {
        self.cache.get_messages_for_render()
    }

    pub fn get_recent_messages_for_context(&self, max_count: usize) -> Vec<Message> {
        self.cache.get_recent_messages_for_context(max_count)
    }

    /// Context window sized by `config.context_window`.
    pub fn recent_context(&self) -> Vec<Message> {
        self.cache
            .get_recent_messages_for_context(self.config.context_window)
    }

    pub fn pending_messages(&self) -> Vec<Message> {
        self.cache.pending_messages()
    }

    pub fn failed_messages(&self) -> Vec<Message> {
        self.cache.failed_messages()
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.cache.snapshot()
    }

    /// Ends the session: drops every observer and hands back the final state.
    pub fn dispose(self) -> CacheSnapshot {
        self.bus.clear();
        info!("Chat sync session disposed with {} entries", self.cache.len());
        self.cache.snapshot()
    }

    fn commit(&mut self, event: CacheEvent) {
        debug!("commit {}", event.event_type());
        let snapshot = self.cache.snapshot();
        self.persist(&event, &snapshot);
        self.bus.publish(&event, &snapshot);
    }

    fn persist(&mut self, event: &CacheEvent, snapshot: &CacheSnapshot) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if matches!(event, CacheEvent::Cleared) {
            if let Err(e) = persistence.clear() {
                warn!("Failed to remove persisted cache: {}", e);
            }
            return;
        }
        if self.persistence_degraded {
            return;
        }
        if let Err(e) = persistence.save(snapshot) {
            error!(
                "Failed to persist cache, continuing in memory only: {}",
                e
            );
            self.persistence_degraded = true;
        }
    }
}
