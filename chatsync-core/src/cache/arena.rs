// File: src/cache/arena.rs
//
// Storage for every message the cache knows about. Each message lives in one
// slot keyed by a stable `Handle`; the display order holds handles, and two
// indexes map server ids (confirmed slots) and temp ids (pending slots) back
// to handles. A slot is reachable through exactly one index, matching its phase.

use std::collections::{HashMap, HashSet, VecDeque};

use chatsync_common::models::{Message, PendingEviction};

/// Stable internal reference to an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone)]
struct Slot {
    message: Message,
    phase: Phase,
}

/// What happened to a pending slot on confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The pending slot now holds the confirmed message, same display position.
    Replaced,
    /// The server id was already confirmed; the pending slot was folded into it.
    Merged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedEntry {
    pub ident: String,
    pub phase: Phase,
}

#[derive(Debug, Clone, Default)]
pub struct MessageArena {
    slots: HashMap<Handle, Slot>,
    by_id: HashMap<String, Handle>,
    by_temp: HashMap<String, Handle>,
    /// Front is the head: newest interactively added entry.
    order: VecDeque<Handle>,
    next_handle: u64,
}

impl MessageArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.by_id.clear();
        self.by_temp.clear();
        self.order.clear();
    }

    pub fn contains_confirmed(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn contains_pending(&self, temp_id: &str) -> bool {
        self.by_temp.contains_key(temp_id)
    }

    /// True when `ident` is taken in either index.
    pub fn contains(&self, ident: &str) -> bool {
        self.by_id.contains_key(ident) || self.by_temp.contains_key(ident)
    }

    /// Resolves a server id first, then a temp id.
    pub fn get(&self, ident: &str) -> Option<&Message> {
        self.by_id
            .get(ident)
            .or_else(|| self.by_temp.get(ident))
            .and_then(|h| self.slots.get(h))
            .map(|slot| &slot.message)
    }

    pub fn get_pending(&self, temp_id: &str) -> Option<&Message> {
        self.by_temp
            .get(temp_id)
            .and_then(|h| self.slots.get(h))
            .map(|slot| &slot.message)
    }

    /// Messages in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> + '_ {
        self.order
            .iter()
            .filter_map(|h| self.slots.get(h))
            .map(|slot| &slot.message)
    }

    /// Display-order messages with their phase.
    pub fn iter_with_phase(&self) -> impl Iterator<Item = (&Message, Phase)> + '_ {
        self.order
            .iter()
            .filter_map(|h| self.slots.get(h))
            .map(|slot| (&slot.message, slot.phase))
    }

    /// Display order as identifiers (server id for confirmed, temp id for pending).
    pub fn identifiers(&self) -> Vec<String> {
        self.iter()
            .filter_map(|m| m.identifier().map(str::to_string))
            .collect()
    }

    pub fn confirmed_map(&self) -> HashMap<String, Message> {
        self.by_id
            .iter()
            .filter_map(|(id, h)| self.slots.get(h).map(|s| (id.clone(), s.message.clone())))
            .collect()
    }

    pub fn pending_map(&self) -> HashMap<String, Message> {
        self.by_temp
            .iter()
            .filter_map(|(tid, h)| self.slots.get(h).map(|s| (tid.clone(), s.message.clone())))
            .collect()
    }

    /// Adds a pending message at the head. Rejected when it has no temp id
    /// or the temp id is already taken in either index.
    pub fn push_pending_front(&mut self, message: Message) -> Option<Handle> {
        let handle = self.register_pending(message)?;
        self.order.push_front(handle);
        Some(handle)
    }

    /// Adds a pending message at the tail. Only used when rebuilding
    /// persisted state, where order is already known.
    pub fn push_pending_back(&mut self, message: Message) -> Option<Handle> {
        let handle = self.register_pending(message)?;
        self.order.push_back(handle);
        Some(handle)
    }

    /// Adds a confirmed message at the head. Rejected when it has no id or
    /// the id is already taken in either index.
    pub fn push_confirmed_front(&mut self, message: Message) -> Option<Handle> {
        let handle = self.register_confirmed(message)?;
        self.order.push_front(handle);
        Some(handle)
    }

    /// Adds a confirmed message at the tail, same rejection rules as
    /// [`push_confirmed_front`](Self::push_confirmed_front).
    pub fn push_confirmed_back(&mut self, message: Message) -> Option<Handle> {
        let handle = self.register_confirmed(message)?;
        self.order.push_back(handle);
        Some(handle)
    }

    /// Runs `f` against a pending message. Identifier fields are restored
    /// afterwards so the indexes stay valid.
    pub fn update_pending<R>(
        &mut self,
        temp_id: &str,
        f: impl FnOnce(&mut Message) -> R,
    ) -> Option<R> {
        let handle = *self.by_temp.get(temp_id)?;
        let slot = self.slots.get_mut(&handle)?;
        let (id, tid) = (slot.message.id.clone(), slot.message.temp_id.clone());
        let out = f(&mut slot.message);
        slot.message.id = id;
        slot.message.temp_id = tid;
        Some(out)
    }

    /// Promotes the pending slot `temp_id` to `confirmed`, which must carry
    /// a server id. The slot keeps its display position.
    ///
    /// Refused when the server id is the temp id of another pending slot.
    pub fn confirm(&mut self, temp_id: &str, mut confirmed: Message) -> Option<ConfirmOutcome> {
        let id = confirmed.id.clone()?;
        let handle = *self.by_temp.get(temp_id)?;
        if id != temp_id && self.by_temp.contains_key(&id) {
            return None;
        }
        self.by_temp.remove(temp_id);

        if let Some(&existing) = self.by_id.get(&id) {
            // A push for the same id beat the acknowledgement.
            let pending = self.slots.remove(&handle);
            self.order.retain(|h| *h != handle);
            if let (Some(pending), Some(slot)) = (pending, self.slots.get_mut(&existing)) {
                slot.message.temp_id = pending.message.temp_id;
                slot.message.client_timestamp = pending.message.client_timestamp;
            }
            return Some(ConfirmOutcome::Merged);
        }

        confirmed.temp_id = Some(temp_id.to_string());
        if let Some(slot) = self.slots.get_mut(&handle) {
            slot.message = confirmed;
            slot.phase = Phase::Confirmed;
        }
        self.by_id.insert(id, handle);
        Some(ConfirmOutcome::Replaced)
    }

    /// Drops tail entries until at most `max` remain.
    pub fn evict(&mut self, max: usize, policy: PendingEviction) -> Vec<EvictedEntry> {
        let mut evicted = Vec::new();
        while self.order.len() > max {
            let position = match policy {
                PendingEviction::Evict => self.order.len() - 1,
                PendingEviction::Protect => self
                    .order
                    .iter()
                    .rposition(|h| {
                        self.slots
                            .get(h)
                            .is_some_and(|s| s.phase == Phase::Confirmed)
                    })
                    .unwrap_or(self.order.len() - 1),
            };
            let Some(handle) = self.order.remove(position) else {
                break;
            };
            if let Some(entry) = self.release(handle) {
                evicted.push(entry);
            }
        }
        evicted
    }

    /// Verifies the partition and uniqueness invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        if let Some(ident) = self.by_id.keys().find(|id| self.by_temp.contains_key(*id)) {
            return Err(format!("{} is indexed as both confirmed and pending", ident));
        }
        let mut seen = HashSet::new();
        let mut idents = HashSet::new();
        for handle in &self.order {
            if !seen.insert(*handle) {
                return Err(format!("{:?} appears twice in order", handle));
            }
            let slot = self
                .slots
                .get(handle)
                .ok_or_else(|| format!("{:?} in order has no slot", handle))?;
            let ident = slot
                .message
                .identifier()
                .ok_or_else(|| format!("{:?} has no identifier", handle))?;
            if !idents.insert(ident) {
                return Err(format!("{} appears twice in order", ident));
            }
            let in_confirmed = slot
                .message
                .id
                .as_ref()
                .is_some_and(|id| self.by_id.get(id) == Some(handle));
            let in_pending = slot
                .message
                .temp_id
                .as_ref()
                .is_some_and(|tid| self.by_temp.get(tid) == Some(handle));
            match (slot.phase, in_confirmed, in_pending) {
                (Phase::Confirmed, true, false) | (Phase::Pending, false, true) => {}
                (phase, c, p) => {
                    return Err(format!(
                        "{:?} ({:?}) indexed confirmed={} pending={}",
                        handle, phase, c, p
                    ));
                }
            }
        }
        if self.slots.len() != self.order.len()
            || self.by_id.len() + self.by_temp.len() != self.order.len()
        {
            return Err(format!(
                "size mismatch: order={} slots={} confirmed={} pending={}",
                self.order.len(),
                self.slots.len(),
                self.by_id.len(),
                self.by_temp.len()
            ));
        }
        Ok(())
    }

    fn alloc(&mut self, message: Message, phase: Phase) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        self.slots.insert(handle, Slot { message, phase });
        handle
    }

    fn register_confirmed(&mut self, message: Message) -> Option<Handle> {
        let id = message.id.clone()?;
        if self.contains(&id) {
            return None;
        }
        let handle = self.alloc(message, Phase::Confirmed);
        self.by_id.insert(id, handle);
        Some(handle)
    }

    fn register_pending(&mut self, message: Message) -> Option<Handle> {
        let temp_id = message.temp_id.clone()?;
        if self.contains(&temp_id) {
            return None;
        }
        let handle = self.alloc(message, Phase::Pending);
        self.by_temp.insert(temp_id, handle);
        Some(handle)
    }

    fn release(&mut self, handle: Handle) -> Option<EvictedEntry> {
        let slot = self.slots.remove(&handle)?;
        let ident = match slot.phase {
            Phase::Confirmed => {
                let id = slot.message.id.unwrap_or_default();
                self.by_id.remove(&id);
                id
            }
            Phase::Pending => {
                let tid = slot.message.temp_id.unwrap_or_default();
                self.by_temp.remove(&tid);
                tid
            }
        };
        Some(EvictedEntry { ident, phase: slot.phase })
    }
}
