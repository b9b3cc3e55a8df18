//! SyncController: reconciles a local document cache with the remote store.
//!
//! The store gives no read-your-write guarantee: an accepted mutation becomes
//! visible to listings only after an unbounded, latency-variable confirmation
//! delay. The controller bridges that gap two ways:
//!
//! 1. `create` enters a confirmation-poll phase: bounded repeated listings
//!    until the new key appears. Running out of budget is not a failure -
//!    the write may still land - so the call degrades to a best-effort
//!    refresh and reports the timeout through the event bus.
//! 2. `update`/`modify`/`remove` apply to the cache optimistically, the
//!    moment the mutation is accepted. Responsiveness is chosen over
//!    read-your-write: a later refresh can transiently resurface a stale
//!    value until the write propagates.
//!
//! The confirmation poll (repeat a successful read until a state appears) is
//! deliberately separate from `retry::with_backoff` (re-invoke a failing
//! operation); read paths use the latter, `create` uses the former.
//!
//! Dropping a `create` future is the cancellation path for its poll loop:
//! abandoning the consuming screen schedules no further polls, and the
//! in-flight guard is released on drop.

use crate::address::Address;
use crate::config::StoreConfig;
use crate::document::CollectionDocument;
use crate::events::{EventBus, MutationKind, SyncEvent};
use crate::retry;
use crate::store::{DocumentStore, Operation, QueryRequest, QueryResponse, StoreError};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("no identity connected")]
    NotConnected,

    #[error("a write for key {0:?} is still outstanding")]
    WriteInFlight(String),

    #[error("no cached document with key {0:?}")]
    NotFound(String),

    #[error("a document with key {0:?} already exists")]
    AlreadyExists(String),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Tunables for the reconciliation loops.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Listing attempts before a create stops waiting for confirmation.
    pub confirm_attempts: u32,
    /// Spacing between confirmation polls.
    pub confirm_interval: Duration,
    /// Attempts for the read-path retry.
    pub read_attempts: u32,
    /// Base delay for the read-path backoff.
    pub read_base_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            confirm_attempts: 10,
            confirm_interval: Duration::from_secs(2),
            read_attempts: 3,
            read_base_delay: Duration::from_millis(250),
        }
    }
}

/// Identity transitions reported by the session provider.
#[derive(Debug, Clone)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected(Address),
}

/// Owns the client-side cache of one collection for the current identity.
///
/// All methods take `&self`; the cache and the in-flight key set sit behind
/// mutexes so writes to unrelated documents stay concurrent. At most one
/// write per document key is allowed at a time - a second mutation against a
/// key whose earlier write is still outstanding is rejected with
/// [`ControllerError::WriteInFlight`].
pub struct SyncController<T: CollectionDocument, S: DocumentStore> {
    store: S,
    config: Arc<StoreConfig>,
    events: Arc<EventBus>,
    options: SyncOptions,
    owner: Mutex<Option<Address>>,
    cache: Mutex<Vec<T>>,
    in_flight: Mutex<HashSet<String>>,
    /// Bumped on every identity transition. Listings that started under an
    /// earlier epoch must not write the cache when they land.
    session_epoch: AtomicU64,
}

/// Releases the per-key write claim when dropped, so cancellation and error
/// paths cannot leave a key permanently locked.
struct InFlightGuard<'a> {
    keys: &'a Mutex<HashSet<String>>,
    session_epoch: &'a AtomicU64,
    epoch: u64,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        // A session change already cleared the claim set; the same key may be
        // claimed by the new identity now, and that claim is not ours to free.
        if self.session_epoch.load(Ordering::Acquire) == self.epoch {
            self.keys
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.key);
        }
    }
}

impl<T: CollectionDocument, S: DocumentStore> SyncController<T, S> {
    pub fn new(store: S, config: Arc<StoreConfig>, events: Arc<EventBus>) -> Self {
        Self::with_options(store, config, events, SyncOptions::default())
    }

    pub fn with_options(
        store: S,
        config: Arc<StoreConfig>,
        events: Arc<EventBus>,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            config,
            events,
            options,
            owner: Mutex::new(None),
            cache: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
            session_epoch: AtomicU64::new(0),
        }
    }

    /// Snapshot of the cached documents, in display order.
    pub fn documents(&self) -> Vec<T> {
        self.lock_cache().clone()
    }

    /// The currently connected owner, if any.
    pub fn owner(&self) -> Option<Address> {
        self.owner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether a write for `key` is still outstanding. Screens use this to
    /// disable exactly the affected control instead of taking a global lock.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    /// Apply an identity transition. Connect (or owner change) resets the
    /// cache and refreshes; disconnect clears everything; a connecting
    /// session leaves the cache as is.
    pub async fn set_session(&self, state: SessionState) -> Vec<T> {
        match state {
            SessionState::Disconnected => {
                let had_owner = self
                    .owner
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take()
                    .is_some();
                self.session_epoch.fetch_add(1, Ordering::AcqRel);
                self.lock_cache().clear();
                self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).clear();
                if had_owner {
                    self.events.emit(SyncEvent::SessionChanged { connected: false });
                }
                Vec::new()
            }
            SessionState::Connecting => self.documents(),
            SessionState::Connected(next) => {
                let changed = {
                    let mut owner = self.owner.lock().unwrap_or_else(|e| e.into_inner());
                    let changed = owner.as_ref() != Some(&next);
                    *owner = Some(next);
                    changed
                };
                if changed {
                    self.session_epoch.fetch_add(1, Ordering::AcqRel);
                    self.lock_cache().clear();
                    // Claims made under the previous identity must not block
                    // the new owner's first writes.
                    self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).clear();
                    self.events.emit(SyncEvent::SessionChanged { connected: true });
                }
                self.refresh().await
            }
        }
    }

    /// Rebuild the cache from a fresh listing.
    ///
    /// Never an error to the caller: with no identity, or after the listing
    /// query fails past its retry budget, the previous cache contents are
    /// returned and the failure is logged. Undecodable payloads are dropped
    /// from the visible set and reported on the event bus.
    pub async fn refresh(&self) -> Vec<T> {
        let Some(owner) = self.owner() else {
            return Vec::new();
        };
        let epoch = self.current_epoch();

        let listing = retry::with_backoff(
            self.options.read_attempts,
            self.options.read_base_delay,
            || {
                self.store.query(
                    &self.config.document_store,
                    QueryRequest::UserDocuments {
                        owner: owner.clone(),
                        collection: T::COLLECTION,
                    },
                )
            },
        )
        .await;

        match listing {
            Ok(response) => self.reconcile(epoch, response),
            Err(err) => {
                warn!(
                    collection = %T::COLLECTION,
                    error = %err,
                    "listing query failed; keeping previous cache"
                );
                self.documents()
            }
        }
    }

    /// Serialize and submit a new document, then poll until it is visible.
    ///
    /// For single-document collections this is an idempotent upsert. Only a
    /// rejected mutation is an error; exhausting the confirmation budget
    /// still returns success after a final best-effort refresh.
    pub async fn create(&self, doc: T) -> Result<Vec<T>> {
        let owner = self.require_owner()?;
        let epoch = self.current_epoch();
        let key = doc.document_key(&owner);
        let _guard = self.claim(&key)?;

        // Multi-document keys are caller-generated and must be unique;
        // single-document collections upsert by owner instead.
        if !T::COLLECTION.single_document() {
            let exists = self
                .lock_cache()
                .iter()
                .any(|d| d.document_key(&owner) == key);
            if exists {
                return Err(ControllerError::AlreadyExists(key));
            }
        }

        let data = serde_json::to_string(&doc)?;
        self.store
            .execute(
                &owner,
                &self.config.document_store,
                Operation::Set {
                    collection: T::COLLECTION,
                    key: key.clone(),
                    data,
                },
                &self.config.sponsored_fee(),
            )
            .await?;
        self.events.emit(SyncEvent::MutationApplied {
            collection: T::COLLECTION,
            key: key.clone(),
            kind: MutationKind::Created,
        });

        // Confirmation-poll phase: the store's own success signal is not
        // proof of durability, so wait for the key to show up in a listing.
        for attempt in 1..=self.options.confirm_attempts {
            tokio::time::sleep(self.options.confirm_interval).await;
            if self.current_epoch() != epoch {
                debug!(key = %key, "identity changed during confirmation; abandoning poll");
                return Ok(self.documents());
            }
            match self
                .store
                .query(
                    &self.config.document_store,
                    QueryRequest::UserDocuments {
                        owner: owner.clone(),
                        collection: T::COLLECTION,
                    },
                )
                .await
            {
                Ok(Some(response)) if response.documents.iter().any(|d| d.key == key) => {
                    info!(
                        collection = %T::COLLECTION,
                        key = %key,
                        attempt,
                        "write confirmed"
                    );
                    self.events.emit(SyncEvent::WriteConfirmed {
                        collection: T::COLLECTION,
                        key: key.clone(),
                        attempts: attempt,
                    });
                    return Ok(self.reconcile(epoch, Some(response)));
                }
                Ok(_) => {
                    debug!(key = %key, attempt, "write not yet visible");
                }
                Err(err) => {
                    // A failing poll tick is indistinguishable from "not yet
                    // visible"; only the mutation call itself can fail a create.
                    debug!(key = %key, attempt, error = %err, "confirmation poll tick failed");
                }
            }
        }

        warn!(
            collection = %T::COLLECTION,
            key = %key,
            attempts = self.options.confirm_attempts,
            "confirmation budget exhausted; write may still land later"
        );
        self.events.emit(SyncEvent::ConfirmationTimedOut {
            collection: T::COLLECTION,
            key: key.clone(),
            attempts: self.options.confirm_attempts,
        });
        Ok(self.refresh().await)
    }

    /// Submit the fully-updated document, then apply it to the cache
    /// optimistically. On a rejected mutation the cache is untouched.
    pub async fn update(&self, doc: T) -> Result<()> {
        let owner = self.require_owner()?;
        let key = doc.document_key(&owner);
        let _guard = self.claim(&key)?;

        let data = serde_json::to_string(&doc)?;
        self.store
            .execute(
                &owner,
                &self.config.document_store,
                Operation::Update {
                    collection: T::COLLECTION,
                    key: key.clone(),
                    data,
                },
                &self.config.sponsored_fee(),
            )
            .await?;

        self.apply_local(&owner, &key, doc);
        debug!(collection = %T::COLLECTION, key = %key, "optimistic update applied");
        self.events.emit(SyncEvent::MutationApplied {
            collection: T::COLLECTION,
            key,
            kind: MutationKind::Updated,
        });
        Ok(())
    }

    /// Read-modify-write: clone the cached document, let `f` edit it, and
    /// submit the result via [`update`](Self::update). The store has no
    /// partial update, so this is how toggles and field edits are expressed.
    pub async fn modify(&self, key: &str, f: impl FnOnce(&mut T)) -> Result<()> {
        let owner = self.require_owner()?;
        let mut doc = {
            let cache = self.lock_cache();
            cache
                .iter()
                .find(|d| d.document_key(&owner) == key)
                .cloned()
                .ok_or_else(|| ControllerError::NotFound(key.to_string()))?
        };
        f(&mut doc);
        self.update(doc).await
    }

    /// Submit a delete, then drop the key from the cache optimistically.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let owner = self.require_owner()?;
        let _guard = self.claim(key)?;

        self.store
            .execute(
                &owner,
                &self.config.document_store,
                Operation::Delete {
                    collection: T::COLLECTION,
                    key: key.to_string(),
                },
                &self.config.sponsored_fee(),
            )
            .await?;

        self.lock_cache().retain(|d| d.document_key(&owner) != key);
        self.events.emit(SyncEvent::MutationApplied {
            collection: T::COLLECTION,
            key: key.to_string(),
            kind: MutationKind::Removed,
        });
        Ok(())
    }

    /// Replace the cache with a deserialized listing, dropping undecodable
    /// entries and restoring display order.
    ///
    /// `epoch` is the session epoch the listing was requested under; if the
    /// identity changed while the query was in flight, the stale listing is
    /// discarded instead of written over the new session's cache.
    fn reconcile(&self, epoch: u64, response: Option<QueryResponse>) -> Vec<T> {
        let entries = response.map(|r| r.documents).unwrap_or_default();
        let mut docs = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_str::<T>(&entry.data) {
                Ok(doc) => docs.push(doc),
                Err(err) => {
                    warn!(
                        collection = %T::COLLECTION,
                        key = %entry.key,
                        error = %err,
                        "dropping undecodable document"
                    );
                    self.events.emit(SyncEvent::DocumentDropped {
                        collection: T::COLLECTION,
                        key: entry.key,
                    });
                }
            }
        }
        sort_newest_first(&mut docs);

        {
            let mut cache = self.lock_cache();
            if self.current_epoch() != epoch {
                warn!(
                    collection = %T::COLLECTION,
                    "listing arrived after a session change; cache left untouched"
                );
                return cache.clone();
            }
            *cache = docs.clone();
        }
        self.events.emit(SyncEvent::RefreshCompleted {
            collection: T::COLLECTION,
            count: docs.len(),
        });
        debug!(collection = %T::COLLECTION, count = docs.len(), "cache rebuilt from listing");
        docs
    }

    fn apply_local(&self, owner: &Address, key: &str, doc: T) {
        let mut cache = self.lock_cache();
        match cache.iter().position(|d| d.document_key(owner) == key) {
            Some(i) => cache[i] = doc,
            // Upsert: single-document collections may update before any refresh.
            None => cache.push(doc),
        }
        sort_newest_first(&mut cache);
    }

    fn require_owner(&self) -> Result<Address> {
        self.owner().ok_or(ControllerError::NotConnected)
    }

    fn claim(&self, key: &str) -> Result<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(key.to_string()) {
            return Err(ControllerError::WriteInFlight(key.to_string()));
        }
        Ok(InFlightGuard {
            keys: &self.in_flight,
            session_epoch: &self.session_epoch,
            epoch: self.current_epoch(),
            key: key.to_string(),
        })
    }

    fn lock_cache(&self) -> MutexGuard<'_, Vec<T>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_epoch(&self) -> u64 {
        self.session_epoch.load(Ordering::Acquire)
    }
}

/// Sort by creation timestamp descending. `Vec::sort_by` is stable, so
/// entries with equal (or absent) timestamps keep their listing order.
fn sort_newest_first<T: CollectionDocument>(docs: &mut [T]) {
    docs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Collection, Settings, Todo};
    use crate::store::InMemoryStore;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> Arc<StoreConfig> {
        Arc::new(StoreConfig::new(
            "0xcccccccccccccccccccccccccccccccccccccccc".parse().unwrap(),
            "0xdddddddddddddddddddddddddddddddddddddddd".parse().unwrap(),
            "http://127.0.0.1:8545",
            "http://127.0.0.1:1317",
        ))
    }

    fn test_options() -> SyncOptions {
        SyncOptions {
            confirm_attempts: 10,
            confirm_interval: Duration::from_millis(5),
            read_attempts: 2,
            read_base_delay: Duration::from_millis(1),
        }
    }

    fn owner() -> Address {
        "0x1111111111111111111111111111111111111111".parse().unwrap()
    }

    fn other_owner() -> Address {
        "0x2222222222222222222222222222222222222222".parse().unwrap()
    }

    fn todo_controller(
        store: Arc<InMemoryStore>,
    ) -> (Arc<SyncController<Todo, Arc<InMemoryStore>>>, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        let controller = Arc::new(SyncController::with_options(
            store,
            test_config(),
            Arc::clone(&events),
            test_options(),
        ));
        (controller, events)
    }

    fn seeded_todo(id: &str, title: &str, completed: bool, secs: i64) -> String {
        let todo = Todo {
            id: id.into(),
            title: title.into(),
            text: title.into(),
            completed,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        };
        serde_json::to_string(&todo).unwrap()
    }

    /// Counts emitted events matching a predicate.
    fn count_events(
        events: &Arc<EventBus>,
        pred: impl Fn(&SyncEvent) -> bool + Send + Sync + 'static,
    ) -> (Arc<AtomicU32>, crate::events::Subscription) {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        let sub = events.subscribe(move |event| {
            if pred(&event) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });
        (count, sub)
    }

    #[tokio::test]
    async fn refresh_mirrors_remote_listing_sorted_newest_first() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw(&owner(), Collection::Todos, "a", &seeded_todo("a", "old", false, 100));
        store.insert_raw(&owner(), Collection::Todos, "b", &seeded_todo("b", "new", false, 300));
        store.insert_raw(&owner(), Collection::Todos, "c", &seeded_todo("c", "mid", true, 200));

        let (controller, _) = todo_controller(store);
        let docs = controller.set_session(SessionState::Connected(owner())).await;

        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
        assert!(docs[1].completed);
    }

    #[tokio::test]
    async fn refresh_drops_undecodable_documents() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw(&owner(), Collection::Todos, "1", &seeded_todo("1", "ok", false, 1));
        store.insert_raw(&owner(), Collection::Todos, "bad", "not json at all");

        let (controller, events) = todo_controller(store);
        let (dropped, _sub) = count_events(&events, |e| {
            matches!(e, SyncEvent::DocumentDropped { key, .. } if key == "bad")
        });

        let docs = controller.set_session(SessionState::Connected(owner())).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "1");
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn refresh_failure_degrades_to_previous_cache() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw(&owner(), Collection::Todos, "1", &seeded_todo("1", "t", false, 1));

        let (controller, _) = todo_controller(Arc::clone(&store));
        controller.set_session(SessionState::Connected(owner())).await;
        assert_eq!(controller.documents().len(), 1);

        store.set_fail_queries(true);
        let docs = controller.refresh().await;
        assert_eq!(docs.len(), 1, "previous cache survives a failed listing");
    }

    #[tokio::test]
    async fn refresh_is_empty_for_owner_without_documents() {
        let store = Arc::new(InMemoryStore::new());
        let (controller, _) = todo_controller(store);
        let docs = controller.set_session(SessionState::Connected(owner())).await;
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn create_confirms_once_write_becomes_visible() {
        let store = Arc::new(InMemoryStore::new());
        store.set_visibility_delay(3);

        let (controller, events) = todo_controller(store);
        controller.set_session(SessionState::Connected(owner())).await;

        let (confirmed, _sub) = count_events(&events, |e| {
            matches!(e, SyncEvent::WriteConfirmed { attempts: 3, .. })
        });

        let todo = Todo::new("confirm me", "");
        let id = todo.id.clone();
        let docs = controller.create(todo).await.unwrap();

        assert_eq!(confirmed.load(Ordering::Relaxed), 1);
        assert!(docs.iter().any(|d| d.id == id));
        assert!(!controller.is_in_flight(&id));
    }

    #[tokio::test]
    async fn create_returns_success_past_confirmation_budget() {
        let store = Arc::new(InMemoryStore::new());
        store.set_visibility_delay(50);

        let events = Arc::new(EventBus::new());
        let mut options = test_options();
        options.confirm_attempts = 2;
        let controller: SyncController<Todo, Arc<InMemoryStore>> = SyncController::with_options(
            Arc::clone(&store),
            test_config(),
            Arc::clone(&events),
            options,
        );
        controller.set_session(SessionState::Connected(owner())).await;

        let (timed_out, _sub) = count_events(&events, |e| {
            matches!(e, SyncEvent::ConfirmationTimedOut { attempts: 2, .. })
        });

        let todo = Todo::new("slow write", "");
        let id = todo.id.clone();
        let docs = controller.create(todo).await.unwrap();

        assert_eq!(timed_out.load(Ordering::Relaxed), 1);
        assert!(
            !docs.iter().any(|d| d.id == id),
            "still pending after the final best-effort refresh"
        );
    }

    #[tokio::test]
    async fn create_surfaces_rejected_mutation() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_next_executes(1);

        let (controller, _) = todo_controller(store);
        controller.set_session(SessionState::Connected(owner())).await;

        let todo = Todo::new("doomed", "");
        let id = todo.id.clone();
        let err = controller.create(todo).await.unwrap_err();
        assert!(matches!(err, ControllerError::Store(StoreError::Rejected(_))));
        assert!(controller.documents().is_empty());
        assert!(!controller.is_in_flight(&id), "guard released on error");
    }

    #[tokio::test]
    async fn toggle_is_visible_immediately_independent_of_confirmation() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw(
            &owner(),
            Collection::Todos,
            "42",
            r#"{"id":"42","title":"x","text":"x","completed":false,"created_at":"2024-01-01T00:00:00Z"}"#,
        );

        let (controller, _) = todo_controller(Arc::clone(&store));
        let docs = controller.set_session(SessionState::Connected(owner())).await;
        assert_eq!(docs.len(), 1);
        assert!(!docs[0].completed);

        // Remote propagation stalls; the cache must not wait for it.
        store.set_visibility_delay(100);
        controller.modify("42", Todo::toggle).await.unwrap();

        let docs = controller.documents();
        assert!(docs[0].completed, "optimistic toggle visible before any refresh");
    }

    #[tokio::test]
    async fn failed_update_leaves_cache_unchanged() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw(&owner(), Collection::Todos, "1", &seeded_todo("1", "t", false, 1));

        let (controller, _) = todo_controller(Arc::clone(&store));
        controller.set_session(SessionState::Connected(owner())).await;

        store.fail_next_executes(1);
        let err = controller.modify("1", Todo::toggle).await.unwrap_err();
        assert!(matches!(err, ControllerError::Store(_)));
        assert!(!controller.documents()[0].completed);
    }

    #[tokio::test]
    async fn update_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw(&owner(), Collection::Todos, "1", &seeded_todo("1", "t", false, 1));

        let (controller, _) = todo_controller(store);
        controller.set_session(SessionState::Connected(owner())).await;

        let mut doc = controller.documents().remove(0);
        doc.completed = true;
        controller.update(doc.clone()).await.unwrap();
        let after_first = controller.documents();
        controller.update(doc).await.unwrap();
        assert_eq!(controller.documents(), after_first);
    }

    #[tokio::test]
    async fn remove_drops_key_optimistically() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw(&owner(), Collection::Todos, "1", &seeded_todo("1", "t", false, 1));
        store.insert_raw(&owner(), Collection::Todos, "2", &seeded_todo("2", "u", false, 2));

        let (controller, _) = todo_controller(Arc::clone(&store));
        controller.set_session(SessionState::Connected(owner())).await;

        controller.remove("1").await.unwrap();
        let ids: Vec<String> = controller.documents().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, ["2"]);
        assert!(!store.contains(&owner(), Collection::Todos, "1"));
    }

    #[tokio::test]
    async fn second_write_to_same_key_is_rejected_while_outstanding() {
        let store = Arc::new(InMemoryStore::new());
        store.set_visibility_delay(5);

        let (controller, _) = todo_controller(store);
        controller.set_session(SessionState::Connected(owner())).await;

        let todo = Todo::new("contended", "");
        let id = todo.id.clone();
        let background = {
            let controller = Arc::clone(&controller);
            let todo = todo.clone();
            tokio::spawn(async move { controller.create(todo).await })
        };

        // Give the create a moment to claim the key and start polling.
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(controller.is_in_flight(&id));
        let err = controller.update(todo).await.unwrap_err();
        assert!(matches!(err, ControllerError::WriteInFlight(k) if k == id));

        background.await.unwrap().unwrap();
        assert!(!controller.is_in_flight(&id));
    }

    #[tokio::test]
    async fn session_transitions_reset_the_cache() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw(&owner(), Collection::Todos, "1", &seeded_todo("1", "mine", false, 1));
        store.insert_raw(&other_owner(), Collection::Todos, "9", &seeded_todo("9", "theirs", false, 9));

        let (controller, _) = todo_controller(store);

        let docs = controller.set_session(SessionState::Connected(owner())).await;
        assert_eq!(docs[0].id, "1");

        // Address change swaps the visible set.
        let docs = controller.set_session(SessionState::Connected(other_owner())).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "9");

        let docs = controller.set_session(SessionState::Disconnected).await;
        assert!(docs.is_empty());
        assert!(controller.documents().is_empty());
        assert!(controller.owner().is_none());

        // Mutations without an identity are refused.
        let err = controller.create(Todo::new("orphan", "")).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotConnected));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_todo_key() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw(&owner(), Collection::Todos, "1", &seeded_todo("1", "first", false, 1));

        let (controller, _) = todo_controller(store);
        controller.set_session(SessionState::Connected(owner())).await;

        let copy = Todo {
            id: "1".into(),
            title: "second".into(),
            text: String::new(),
            completed: false,
            created_at: Utc.timestamp_opt(2, 0).unwrap(),
        };
        let err = controller.create(copy).await.unwrap_err();
        assert!(matches!(err, ControllerError::AlreadyExists(k) if k == "1"));
        assert_eq!(controller.documents()[0].title, "first");
        assert!(!controller.is_in_flight("1"), "guard released on rejection");
    }

    #[tokio::test]
    async fn create_finishing_after_owner_switch_does_not_pollute_cache() {
        let store = Arc::new(InMemoryStore::new());
        store.set_visibility_delay(3);
        store.insert_raw(
            &other_owner(),
            Collection::Todos,
            "9",
            &seeded_todo("9", "theirs", false, 9),
        );

        let (controller, _) = todo_controller(store);
        controller.set_session(SessionState::Connected(owner())).await;

        let todo = Todo::new("left behind", "");
        let id = todo.id.clone();
        let background = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.create(todo).await })
        };

        // Switch identity while the create is still polling for confirmation.
        tokio::time::sleep(Duration::from_millis(2)).await;
        controller.set_session(SessionState::Connected(other_owner())).await;

        let docs = background.await.unwrap().unwrap();
        assert!(
            !docs.iter().any(|d| d.id == id),
            "stale listing must not land in the new session's cache"
        );
        assert_eq!(controller.owner(), Some(other_owner()));
        let ids: Vec<String> = controller.documents().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, ["9"]);
    }

    #[tokio::test]
    async fn owner_change_releases_stale_write_claims() {
        let store = Arc::new(InMemoryStore::new());
        store.set_visibility_delay(5);

        let (controller, _) = todo_controller(Arc::clone(&store));
        controller.set_session(SessionState::Connected(owner())).await;

        let todo = Todo::new("orphaned claim", "");
        let id = todo.id.clone();
        let background = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.create(todo).await })
        };

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(controller.is_in_flight(&id));

        controller.set_session(SessionState::Connected(other_owner())).await;
        assert!(!controller.is_in_flight(&id), "old identity's claim is released");

        // The new owner can write the same key straight away.
        store.set_visibility_delay(0);
        let replacement = Todo {
            id: id.clone(),
            title: "fresh start".into(),
            text: String::new(),
            completed: false,
            created_at: Utc.timestamp_opt(10, 0).unwrap(),
        };
        let docs = controller.create(replacement).await.unwrap();
        assert!(docs.iter().any(|d| d.id == id));

        background.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn settings_create_is_an_upsert() {
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(EventBus::new());
        let controller: SyncController<Settings, Arc<InMemoryStore>> =
            SyncController::with_options(store, test_config(), events, test_options());
        controller.set_session(SessionState::Connected(owner())).await;

        let mut settings = Settings::default();
        controller.create(settings.clone()).await.unwrap();

        settings.dark_mode = true;
        let docs = controller.create(settings).await.unwrap();
        assert_eq!(docs.len(), 1, "single document per owner");
        assert!(docs[0].dark_mode);
    }
}
