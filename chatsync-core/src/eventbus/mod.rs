//! src/eventbus/mod.rs
//!
//! Fans cache changes out to observers. Callback listeners get a snapshot of
//! the whole cache after every change; channel subscribers get the
//! `CacheEvent` describing the change.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use chatsync_common::models::CacheSnapshot;

/// Description of one applied cache mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    OptimisticAdded {
        temp_id: String,
        evicted: Vec<String>,
    },
    Confirmed {
        temp_id: String,
        id: String,
        /// The id was already confirmed and the pending entry folded into it.
        merged: bool,
    },
    MarkedFailed {
        temp_id: String,
        retry_count: u32,
    },
    RetryStarted {
        temp_id: String,
        retry_count: u32,
    },
    Received {
        id: String,
        evicted: Vec<String>,
    },
    HistoryMerged {
        page: u32,
        has_more: bool,
        added: usize,
        replaced: bool,
        evicted: Vec<String>,
    },
    LoadingChanged {
        is_loading: bool,
        is_loading_more: bool,
    },
    Cleared,
}

impl CacheEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::OptimisticAdded { .. } => "message.optimistic",
            CacheEvent::Confirmed { .. } => "message.confirmed",
            CacheEvent::MarkedFailed { .. } => "message.failed",
            CacheEvent::RetryStarted { .. } => "message.retry",
            CacheEvent::Received { .. } => "message.received",
            CacheEvent::HistoryMerged { .. } => "history.merged",
            CacheEvent::LoadingChanged { .. } => "loading.changed",
            CacheEvent::Cleared => "cache.cleared",
        }
    }

    /// Identifiers dropped by eviction as part of this change.
    pub fn evicted(&self) -> &[String] {
        match self {
            CacheEvent::OptimisticAdded { evicted, .. }
            | CacheEvent::Received { evicted, .. }
            | CacheEvent::HistoryMerged { evicted, .. } => evicted,
            _ => &[],
        }
    }
}

type Listener = Arc<dyn Fn(&CacheSnapshot) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    listeners: Vec<(u64, Listener)>,
    channels: Vec<mpsc::Sender<CacheEvent>>,
    next_id: u64,
}

/// Default size for each channel subscriber's buffer.
const DEFAULT_BUFFER_SIZE: usize = 256;

/// Publish/subscribe hub for cache changes.
///
/// Publishing never blocks: channel subscribers whose buffer is full miss the
/// event, and subscribers that dropped their receiver are pruned.
#[derive(Clone, Default)]
pub struct CacheEventBus {
    inner: Arc<Mutex<BusInner>>,
}

/// Handle returned by [`CacheEventBus::subscribe`]. Dropping it keeps the
/// listener registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    /// Removes the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let mut inner = bus.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(id, _)| *id != self.id);
        inner.listeners.len() != before
    }
}

impl CacheEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback run with a snapshot after every change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CacheSnapshot) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Returns a receiver on which change events will be delivered.
    pub fn subscribe_events(&self, buffer_size: Option<usize>) -> mpsc::Receiver<CacheEvent> {
        let size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let (tx, rx) = mpsc::channel(size);
        self.inner.lock().channels.push(tx);
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Delivers one change to every observer.
    pub fn publish(&self, event: &CacheEvent, snapshot: &CacheSnapshot) {
        // Listeners may subscribe or unsubscribe from inside the callback,
        // so they run outside the lock.
        let (listeners, channels) = {
            let inner = self.inner.lock();
            let listeners: Vec<Listener> =
                inner.listeners.iter().map(|(_, l)| l.clone()).collect();
            (listeners, inner.channels.clone())
        };
        trace!(
            "publishing {} to {} listeners, {} channels",
            event.event_type(),
            listeners.len(),
            channels.len()
        );

        for listener in listeners {
            listener(snapshot);
        }

        let mut closed = false;
        for tx in &channels {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("event subscriber lagging, dropped {}", event.event_type());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed = true,
            }
        }
        if closed {
            self.inner.lock().channels.retain(|tx| !tx.is_closed());
        }
    }

    /// Drops every listener and channel subscriber.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.listeners.clear();
        inner.channels.clear();
    }
}
