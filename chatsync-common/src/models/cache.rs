use std::collections::HashMap;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;

/// Default cap on the number of entries in the display order.
pub const DEFAULT_MAX_MESSAGES: usize = 200;

/// Default number of messages handed out for an AI context window.
pub const DEFAULT_CONTEXT_WINDOW: usize = 15;

/// Storage key the cache persists itself under.
pub const DEFAULT_STORAGE_KEY: &str = "chat_cache";

/// Version tag written into every persisted payload.
pub const PERSISTED_VERSION: u32 = 1;

/// What eviction is allowed to do with messages that are still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingEviction {
    /// Evict strictly from the tail, pending or not.
    #[default]
    Evict,
    /// Evict the tail-most confirmed entry first; pending entries go only
    /// when nothing confirmed is left.
    Protect,
}

/// Rules for trimming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimPolicy {
    pub max_total_messages: usize,
    #[serde(default)]
    pub pending_eviction: PendingEviction,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            max_total_messages: DEFAULT_MAX_MESSAGES,
            pending_eviction: PendingEviction::default(),
        }
    }
}

/// Config that the message cache will use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub trim_policy: TrimPolicy,
    pub storage_key: String,
    pub context_window: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            trim_policy: TrimPolicy::default(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }
}

/// Full copy of the cache state handed to observers.
///
/// `confirmed` is keyed by server id, `pending` by temp id, and `order` lists
/// those identifiers newest-first. Mutating a snapshot never touches the cache
/// it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub confirmed: HashMap<String, Message>,
    pub pending: HashMap<String, Message>,
    pub order: Vec<String>,
    pub page: u32,
    pub has_more: bool,
    pub total_count: usize,
    pub last_sync_timestamp: Option<i64>,
    pub is_loading: bool,
    pub is_loading_more: bool,
}

impl Default for CacheSnapshot {
    fn default() -> Self {
        Self {
            confirmed: HashMap::new(),
            pending: HashMap::new(),
            order: Vec::new(),
            page: 1,
            has_more: true,
            total_count: 0,
            last_sync_timestamp: None,
            is_loading: false,
            is_loading_more: false,
        }
    }
}

impl CacheSnapshot {
    /// Messages in display order.
    pub fn messages(&self) -> Vec<&Message> {
        self.order
            .iter()
            .filter_map(|ident| self.resolve(ident))
            .collect()
    }

    pub fn resolve(&self, ident: &str) -> Option<&Message> {
        self.confirmed.get(ident).or_else(|| self.pending.get(ident))
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The durable form of the cache. Transient loading flags are not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedCache {
    pub version: u32,
    pub confirmed: HashMap<String, Message>,
    pub pending: HashMap<String, Message>,
    pub order: Vec<String>,
    pub page: u32,
    pub has_more: bool,
    pub total_count: usize,
    pub last_sync_timestamp: Option<i64>,
}

impl From<CacheSnapshot> for PersistedCache {
    fn from(snapshot: CacheSnapshot) -> Self {
        Self {
            version: PERSISTED_VERSION,
            confirmed: snapshot.confirmed,
            pending: snapshot.pending,
            order: snapshot.order,
            page: snapshot.page,
            has_more: snapshot.has_more,
            total_count: snapshot.total_count,
            last_sync_timestamp: snapshot.last_sync_timestamp,
        }
    }
}
