// File: src/cache/persistence.rs

use std::sync::Arc;

use tracing::debug;

use chatsync_common::models::cache::PERSISTED_VERSION;
use chatsync_common::models::{CacheSnapshot, PersistedCache};
use chatsync_common::traits::KeyValueStore;

use crate::Error;

/// Reads and writes the cache's persisted form under one storage key.
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `Ok(None)` when nothing is stored yet.
    pub fn load(&self) -> Result<Option<PersistedCache>, Error> {
        let Some(raw) = self.store.get(&self.key)? else {
            debug!("No persisted cache under '{}'", self.key);
            return Ok(None);
        };
        let persisted: PersistedCache = serde_json::from_str(&raw)?;
        if persisted.version != PERSISTED_VERSION {
            return Err(Error::Parse(format!(
                "persisted cache version {} (expected {})",
                persisted.version, PERSISTED_VERSION
            )));
        }
        Ok(Some(persisted))
    }

    pub fn save(&self, snapshot: &CacheSnapshot) -> Result<(), Error> {
        let payload = serde_json::to_string(&PersistedCache::from(snapshot.clone()))?;
        self.store.set(&self.key, &payload)?;
        debug!("Persisted {} entries under '{}'", snapshot.total_count, self.key);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), Error> {
        self.store.remove(&self.key)
    }
}
