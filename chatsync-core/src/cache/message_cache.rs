// File: src/cache/message_cache.rs

use std::collections::HashSet;

use tracing::{debug, info, warn};

use chatsync_common::models::{
    CacheSnapshot, Message, MessageStatus, PersistedCache, ServerMessage, TrimPolicy,
};

use crate::cache::arena::{ConfirmOutcome, EvictedEntry, MessageArena, Phase};
use crate::eventbus::CacheEvent;
use crate::utils::time::now_millis;

/// In-memory view of one conversation.
///
/// Every mutating call returns the [`CacheEvent`] it applied, or `None` when
/// it was a no-op (unknown or stale identifier). The cache itself never
/// persists or notifies; see `ChatSyncService` for that.
#[derive(Debug, Clone)]
pub struct MessageCache {
    arena: MessageArena,
    trim_policy: TrimPolicy,
    page: u32,
    has_more: bool,
    last_sync_timestamp: Option<i64>,
    is_loading: bool,
    is_loading_more: bool,
}

impl MessageCache {
    pub fn new(trim_policy: TrimPolicy) -> Self {
        let defaults = CacheSnapshot::default();
        Self {
            arena: MessageArena::new(),
            trim_policy,
            page: defaults.page,
            has_more: defaults.has_more,
            last_sync_timestamp: defaults.last_sync_timestamp,
            is_loading: false,
            is_loading_more: false,
        }
    }

    /// Rebuilds a cache from its persisted form.
    ///
    /// Identifiers in `order` that resolve nowhere, or that repeat, are
    /// dropped, as are map entries `order` never mentions. An identifier
    /// present in both maps is restored once, as confirmed.
    pub fn restore(persisted: PersistedCache, trim_policy: TrimPolicy) -> Self {
        let mut cache = Self::new(trim_policy);
        cache.page = persisted.page;
        cache.has_more = persisted.has_more;
        cache.last_sync_timestamp = persisted.last_sync_timestamp;

        let PersistedCache { mut confirmed, mut pending, order, .. } = persisted;
        let mut dropped = 0usize;
        let mut placed = HashSet::new();
        for ident in order {
            if !placed.insert(ident.clone()) {
                dropped += 1;
                continue;
            }
            if let Some(mut msg) = confirmed.remove(&ident) {
                msg.id = Some(ident);
                if cache.arena.push_confirmed_back(msg).is_none() {
                    dropped += 1;
                }
            } else if let Some(mut msg) = pending.remove(&ident) {
                msg.temp_id = Some(ident);
                msg.id = None;
                if cache.arena.push_pending_back(msg).is_none() {
                    dropped += 1;
                }
            } else {
                dropped += 1;
            }
        }
        dropped += confirmed.len() + pending.len();
        if dropped > 0 {
            warn!("Discarded {} inconsistent entries while restoring cache", dropped);
        }

        let evicted = cache.evict();
        info!(
            "Restored message cache: {} entries, page={}, evicted={}",
            cache.arena.len(),
            cache.page,
            evicted.len()
        );
        cache
    }

    pub fn trim_policy(&self) -> &TrimPolicy {
        &self.trim_policy
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn arena(&self) -> &MessageArena {
        &self.arena
    }

    /// Inserts a locally authored message at the head and returns its temp id.
    pub fn add_optimistic_message(&mut self, content: impl Into<String>) -> (String, CacheEvent) {
        let message = Message::optimistic(content, now_millis());
        let temp_id = message.temp_id.clone().unwrap_or_default();
        debug!("add_optimistic_message() temp_id={}", temp_id);

        self.arena.push_pending_front(message);
        let evicted = self.evict();
        (temp_id.clone(), CacheEvent::OptimisticAdded { temp_id, evicted })
    }

    /// Swaps the pending entry `temp_id` for its server-confirmed version,
    /// keeping the display position.
    pub fn confirm_message(&mut self, temp_id: &str, server: ServerMessage) -> Option<CacheEvent> {
        let pending = match self.arena.get_pending(temp_id) {
            Some(m) => m.clone(),
            None => {
                debug!("confirm_message() ignored, {} is not pending", temp_id);
                return None;
            }
        };
        let id = server.id.clone();

        let mut confirmed = Message::from_server(server, now_millis());
        confirmed.client_timestamp = pending.client_timestamp;
        confirmed.retry_count = pending.retry_count;

        let outcome = self.arena.confirm(temp_id, confirmed)?;
        let merged = outcome == ConfirmOutcome::Merged;
        if merged {
            warn!("Confirmation for {} collided with already known message {}", temp_id, id);
        }
        debug!("confirm_message() {} -> {}", temp_id, id);
        Some(CacheEvent::Confirmed {
            temp_id: temp_id.to_string(),
            id,
            merged,
        })
    }

    pub fn mark_message_failed(&mut self, temp_id: &str) -> Option<CacheEvent> {
        let retry_count = self.arena.update_pending(temp_id, |m| {
            m.status = MessageStatus::Failed;
            m.retry_count += 1;
            m.retry_count
        })?;
        debug!("mark_message_failed() {} retry_count={}", temp_id, retry_count);
        Some(CacheEvent::MarkedFailed {
            temp_id: temp_id.to_string(),
            retry_count,
        })
    }

    /// Moves a failed pending entry back to `sending` and returns it so the
    /// caller can resend. Anything not currently failed is left alone.
    pub fn retry_message(&mut self, temp_id: &str) -> Option<(Message, CacheEvent)> {
        if self.arena.get_pending(temp_id)?.status != MessageStatus::Failed {
            debug!("retry_message() ignored, {} is not failed", temp_id);
            return None;
        }
        let message = self.arena.update_pending(temp_id, |m| {
            m.status = MessageStatus::Sending;
            m.retry_count += 1;
            m.clone()
        })?;
        let event = CacheEvent::RetryStarted {
            temp_id: temp_id.to_string(),
            retry_count: message.retry_count,
        };
        Some((message, event))
    }

    /// Inserts a pushed message at the head. Ids already known, as a server
    /// id or as a pending temp id, are ignored.
    ///
    /// Head insertion ignores the message's own timestamp: late deliveries
    /// display as newest.
    pub fn add_received_message(&mut self, server: ServerMessage) -> Option<CacheEvent> {
        if self.arena.contains(&server.id) {
            debug!("add_received_message() ignored duplicate {}", server.id);
            return None;
        }
        let id = server.id.clone();
        self.arena
            .push_confirmed_front(Message::from_server(server, now_millis()))?;
        let evicted = self.evict();
        Some(CacheEvent::Received { id, evicted })
    }

    /// Merges one page of history.
    ///
    /// With `append == false` the cache is rebuilt from `messages` alone, in
    /// the order given. With `append == true` unseen messages go to the tail
    /// and live entries stay where they are.
    pub fn add_history_messages(
        &mut self,
        messages: Vec<ServerMessage>,
        has_more: bool,
        page: u32,
        append: bool,
    ) -> CacheEvent {
        let now = now_millis();
        if !append {
            self.arena.clear();
            self.last_sync_timestamp = Some(now);
        }

        let mut seen = HashSet::new();
        let mut added = 0usize;
        for server in messages {
            if !seen.insert(server.id.clone()) || self.arena.contains(&server.id) {
                continue;
            }
            if self
                .arena
                .push_confirmed_back(Message::from_server(server, now))
                .is_some()
            {
                added += 1;
            }
        }

        self.page = page;
        self.has_more = has_more;
        self.is_loading_more = false;
        let evicted = self.evict();
        debug!(
            "add_history_messages() page={} added={} append={} total={}",
            page,
            added,
            append,
            self.arena.len()
        );
        CacheEvent::HistoryMerged {
            page,
            has_more,
            added,
            replaced: !append,
            evicted,
        }
    }

    pub fn set_loading(&mut self, loading: bool) -> CacheEvent {
        self.is_loading = loading;
        self.loading_event()
    }

    pub fn set_loading_more(&mut self, loading: bool) -> CacheEvent {
        self.is_loading_more = loading;
        self.loading_event()
    }

    /// Resets everything to empty defaults.
    pub fn clear_all(&mut self) -> CacheEvent {
        *self = Self::new(self.trim_policy.clone());
        info!("Message cache cleared");
        CacheEvent::Cleared
    }

    /// Resolves a server id or a pending temp id.
    pub fn get_message(&self, ident: &str) -> Option<&Message> {
        self.arena.get(ident)
    }

    /// Display list, newest interactive entries first.
    pub fn get_messages_for_render(&self) -> Vec<Message> {
        self.arena.iter().cloned().collect()
    }

    /// The `max_count` most recent entries of the display list.
    pub fn get_recent_messages_for_context(&self, max_count: usize) -> Vec<Message> {
        self.arena.iter().take(max_count).cloned().collect()
    }

    /// Unconfirmed entries in display order, failed ones included.
    pub fn pending_messages(&self) -> Vec<Message> {
        self.arena
            .iter_with_phase()
            .filter(|(_, phase)| *phase == Phase::Pending)
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn failed_messages(&self) -> Vec<Message> {
        self.arena
            .iter_with_phase()
            .filter(|(m, phase)| *phase == Phase::Pending && m.status == MessageStatus::Failed)
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub fn order(&self) -> Vec<String> {
        self.arena.identifiers()
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let order = self.arena.identifiers();
        CacheSnapshot {
            confirmed: self.arena.confirmed_map(),
            pending: self.arena.pending_map(),
            total_count: order.len(),
            order,
            page: self.page,
            has_more: self.has_more,
            last_sync_timestamp: self.last_sync_timestamp,
            is_loading: self.is_loading,
            is_loading_more: self.is_loading_more,
        }
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        self.arena.check_invariants()?;
        if self.arena.len() > self.trim_policy.max_total_messages {
            return Err(format!(
                "{} entries exceed cap {}",
                self.arena.len(),
                self.trim_policy.max_total_messages
            ));
        }
        Ok(())
    }

    fn loading_event(&self) -> CacheEvent {
        CacheEvent::LoadingChanged {
            is_loading: self.is_loading,
            is_loading_more: self.is_loading_more,
        }
    }

    fn evict(&mut self) -> Vec<String> {
        let evicted = self.arena.evict(
            self.trim_policy.max_total_messages,
            self.trim_policy.pending_eviction,
        );
        if evicted.is_empty() {
            return Vec::new();
        }
        let lost_pending: Vec<&EvictedEntry> =
            evicted.iter().filter(|e| e.phase == Phase::Pending).collect();
        if !lost_pending.is_empty() {
            warn!(
                "Evicted {} unconfirmed message(s): {:?}",
                lost_pending.len(),
                lost_pending.iter().map(|e| e.ident.as_str()).collect::<Vec<_>>()
            );
        }
        debug!("Evicted {} entries past cap", evicted.len());
        evicted.into_iter().map(|e| e.ident).collect()
    }
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new(TrimPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_common::models::PendingEviction;

    fn small_policy(max: usize) -> TrimPolicy {
        TrimPolicy { max_total_messages: max, pending_eviction: PendingEviction::Evict }
    }

    #[test]
    fn optimistic_then_confirm_keeps_position() {
        let mut cache = MessageCache::default();
        cache.add_received_message(ServerMessage::new("m0", "before", false));
        let (tid, _) = cache.add_optimistic_message("hi");
        cache.add_received_message(ServerMessage::new("m2", "after", false));

        let event = cache.confirm_message(&tid, ServerMessage::new("m1", "hi", true));
        assert!(matches!(event, Some(CacheEvent::Confirmed { merged: false, .. })));
        assert_eq!(cache.order(), vec!["m2", "m1", "m0"]);
        let m1 = cache.get_message("m1").unwrap();
        assert_eq!(m1.status, MessageStatus::Sent);
        assert!(m1.server_timestamp.is_some());
        assert!(cache.get_message(&tid).is_none());
    }

    #[test]
    fn confirm_carries_client_timestamp() {
        let mut cache = MessageCache::default();
        let (tid, _) = cache.add_optimistic_message("hi");
        let created = cache.get_message(&tid).unwrap().client_timestamp;
        cache.confirm_message(&tid, ServerMessage::new("m1", "hi", true).with_timestamp(1));
        assert_eq!(cache.get_message("m1").unwrap().client_timestamp, created);
    }

    #[test]
    fn stale_identifiers_are_noops() {
        let mut cache = MessageCache::default();
        assert!(cache.confirm_message("nope", ServerMessage::new("x", "", false)).is_none());
        assert!(cache.mark_message_failed("nope").is_none());
        assert!(cache.retry_message("nope").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn retry_requires_failed_status() {
        let mut cache = MessageCache::default();
        let (tid, _) = cache.add_optimistic_message("x");
        assert!(cache.retry_message(&tid).is_none());
        cache.mark_message_failed(&tid);
        let (msg, _) = cache.retry_message(&tid).unwrap();
        assert_eq!(msg.status, MessageStatus::Sending);
        assert_eq!(msg.retry_count, 2);
    }

    #[test]
    fn eviction_can_drop_pending_under_default_policy() {
        let mut cache = MessageCache::new(small_policy(2));
        let (tid, _) = cache.add_optimistic_message("first");
        cache.add_received_message(ServerMessage::new("a", "a", false));
        let event = cache.add_received_message(ServerMessage::new("b", "b", false)).unwrap();
        assert_eq!(event.evicted(), [tid.clone()]);
        assert!(cache.confirm_message(&tid, ServerMessage::new("c", "first", true)).is_none());
        assert_eq!(cache.order(), vec!["b", "a"]);
    }

    #[test]
    fn protect_policy_keeps_pending() {
        let mut cache = MessageCache::new(TrimPolicy {
            max_total_messages: 2,
            pending_eviction: PendingEviction::Protect,
        });
        let (tid, _) = cache.add_optimistic_message("first");
        cache.add_received_message(ServerMessage::new("a", "a", false));
        cache.add_received_message(ServerMessage::new("b", "b", false));
        assert_eq!(cache.order(), vec!["b".to_string(), tid]);
        assert!(cache.check_invariants().is_ok());
    }

    #[test]
    fn history_deduplicates_supplied_page() {
        let mut cache = MessageCache::default();
        cache.add_history_messages(
            vec![
                ServerMessage::new("h1", "1", false),
                ServerMessage::new("h2", "2", true),
                ServerMessage::new("h1", "dup", false),
            ],
            true,
            1,
            false,
        );
        assert_eq!(cache.order(), vec!["h1", "h2"]);
        assert_eq!(cache.get_message("h1").unwrap().content, "1");
        assert!(cache.snapshot().last_sync_timestamp.is_some());
    }

    #[test]
    fn history_clears_loading_more() {
        let mut cache = MessageCache::default();
        cache.set_loading_more(true);
        cache.add_history_messages(vec![], false, 3, true);
        let snap = cache.snapshot();
        assert!(!snap.is_loading_more);
        assert_eq!(snap.page, 3);
        assert!(!snap.has_more);
    }

    #[test]
    fn restore_drops_dangling_and_duplicate_ids() {
        let mut cache = MessageCache::default();
        cache.add_received_message(ServerMessage::new("a", "a", false));
        let (tid, _) = cache.add_optimistic_message("p");
        let mut persisted = PersistedCache::from(cache.snapshot());
        persisted.order.push("ghost".into());
        persisted.order.push("a".into());

        let restored = MessageCache::restore(persisted, TrimPolicy::default());
        assert_eq!(restored.order(), vec![tid, "a".to_string()]);
        assert!(restored.check_invariants().is_ok());
    }

    #[test]
    fn restore_keeps_one_entry_for_an_id_in_both_maps() {
        let mut persisted = PersistedCache::from(CacheSnapshot::default());
        let mut shadow = Message::optimistic("shadow", 1);
        shadow.temp_id = Some("x".into());
        persisted.confirmed.insert(
            "x".into(),
            Message::from_server(ServerMessage::new("x", "real", false), 2),
        );
        persisted.pending.insert("x".into(), shadow);
        persisted.order = vec!["x".into(), "x".into()];

        let restored = MessageCache::restore(persisted, TrimPolicy::default());
        assert_eq!(restored.order(), vec!["x"]);
        assert_eq!(restored.get_message("x").unwrap().content, "real");
        assert!(restored.snapshot().pending.is_empty());
        assert!(restored.check_invariants().is_ok());
    }

    #[test]
    fn received_id_matching_a_temp_id_is_ignored() {
        let mut cache = MessageCache::default();
        let (tid, _) = cache.add_optimistic_message("hi");
        assert!(cache.add_received_message(ServerMessage::new(tid.clone(), "echo", false)).is_none());
        cache.add_history_messages(vec![ServerMessage::new(tid.clone(), "old", false)], true, 2, true);

        assert_eq!(cache.order(), vec![tid.clone()]);
        assert!(cache.arena().contains_pending(&tid));
        assert!(cache.check_invariants().is_ok());
    }

    #[test]
    fn restore_applies_a_smaller_cap() {
        let mut cache = MessageCache::default();
        for i in 0..5 {
            cache.add_received_message(ServerMessage::new(format!("m{i}"), "x", false));
        }
        let restored = MessageCache::restore(PersistedCache::from(cache.snapshot()), small_policy(3));
        assert_eq!(restored.order(), vec!["m4", "m3", "m2"]);
    }
}
