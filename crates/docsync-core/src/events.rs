//! Event infrastructure for observability.
//!
//! `SyncEvent` carries what a screen or a metrics sink wants to know about
//! the cache: refreshes, dropped (undecodable) documents, mutations, and the
//! outcome of confirmation polls. `EventBus` fans events out to subscribers;
//! dropping a `Subscription` unsubscribes.

use crate::document::Collection;

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// What kind of mutation was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    Created,
    Updated,
    Removed,
}

/// Events emitted by the sync controller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A listing query completed and the cache was rebuilt.
    RefreshCompleted { collection: Collection, count: usize },
    /// A stored payload failed to deserialize and was dropped from the
    /// visible set. A data-integrity signal, not an error.
    DocumentDropped { collection: Collection, key: String },
    /// A mutation was accepted by the store and applied to the local cache.
    MutationApplied {
        collection: Collection,
        key: String,
        kind: MutationKind,
    },
    /// A created document became visible in a listing.
    WriteConfirmed {
        collection: Collection,
        key: String,
        attempts: u32,
    },
    /// The confirmation budget ran out before the write became visible.
    /// The write may still land later; consumers should treat the document
    /// as pending rather than failed.
    ConfirmationTimedOut {
        collection: Collection,
        key: String,
        attempts: u32,
    },
    /// The identity connected or disconnected.
    SessionChanged { connected: bool },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events, drop it to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Fan-out bus for `SyncEvent`s. Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(SyncEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns a `Subscription` that unsubscribes on
    /// drop. Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write avoids deadlock if a Drop runs while emit holds the
        // read lock during panic unwinding.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Clone the callback list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
