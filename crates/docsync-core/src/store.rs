//! DocumentStore trait: the seam to the remote contract-backed store.
//!
//! Implementations:
//! - `InMemoryStore` - for testing, with visibility-delay and failure hooks
//! - `HttpStore` (in docsync-cli) - REST gateway via reqwest
//!
//! The trait deliberately mirrors the external executor surface: a mutation
//! call (`execute`) and a listing query (`query`). Everything behind it -
//! signing, gas sponsorship, contract semantics - is out of scope here.

use crate::address::Address;
use crate::document::Collection;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("execution rejected: {0}")]
    Rejected(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A mutation against the document store contract.
///
/// `data` is the document payload already serialized to JSON; the store treats
/// it as opaque. There is no partial update: `Update` carries the full
/// document and clients read-modify-write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Operation {
    Set {
        collection: Collection,
        key: String,
        data: String,
    },
    Update {
        collection: Collection,
        key: String,
        data: String,
    },
    Delete {
        collection: Collection,
        key: String,
    },
}

/// How the transaction fee is covered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeeMode {
    /// Fee paid by a treasury contract on the sender's behalf.
    Sponsored { treasury: Address },
    /// Fee paid by the sender.
    Direct,
}

/// A read request against the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueryRequest {
    /// All documents in `collection` owned by `owner`.
    UserDocuments { owner: Address, collection: Collection },
}

/// One (key, serialized payload) listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub key: String,
    pub data: String,
}

/// A successful listing. Absent entirely (`None` from `query`) when the store
/// holds nothing for the owner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    pub documents: Vec<DocumentEntry>,
}

/// Async seam to the remote store.
///
/// Implementations must be `Send + Sync`; the controller holds one per
/// collection and every remote call is a suspend point.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Submit a mutation on behalf of `sender`. A returned error means the
    /// mutation was rejected; success means it was accepted, not that it is
    /// already visible to reads.
    async fn execute(
        &self,
        sender: &Address,
        target: &Address,
        op: Operation,
        fee: &FeeMode,
    ) -> Result<()>;

    /// List documents. `Ok(None)` means the store has no listing for the
    /// request (an owner with no documents).
    async fn query(&self, target: &Address, request: QueryRequest)
    -> Result<Option<QueryResponse>>;
}

// Allow sharing a store between multiple controllers.
#[async_trait]
impl<T: DocumentStore> DocumentStore for std::sync::Arc<T> {
    async fn execute(
        &self,
        sender: &Address,
        target: &Address,
        op: Operation,
        fee: &FeeMode,
    ) -> Result<()> {
        (**self).execute(sender, target, op, fee).await
    }

    async fn query(
        &self,
        target: &Address,
        request: QueryRequest,
    ) -> Result<Option<QueryResponse>> {
        (**self).query(target, request).await
    }
}

/// A write accepted by the store but not yet visible to listings.
#[derive(Debug)]
struct PendingWrite {
    owner: String,
    collection: Collection,
    key: String,
    data: String,
    /// Listing queries remaining before the write becomes visible.
    remaining: u32,
}

#[derive(Debug, Default)]
struct Inner {
    /// (owner, collection) -> entries in insertion order.
    docs: HashMap<(String, Collection), Vec<DocumentEntry>>,
    pending: Vec<PendingWrite>,
    visibility_delay: u32,
    fail_executes: u32,
    fail_queries: bool,
}

impl Inner {
    fn upsert(&mut self, owner: String, collection: Collection, key: String, data: String) {
        let entries = self.docs.entry((owner, collection)).or_default();
        match entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.data = data,
            None => entries.push(DocumentEntry { key, data }),
        }
    }
}

/// In-memory store for testing.
///
/// Mutations are applied immediately unless a visibility delay is set, in
/// which case each accepted write only appears in listings after that many
/// queries against its (owner, collection) - simulating a confirmation
/// latency window. Execute and query failures can be injected.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every subsequent accepted write by `queries` listing queries.
    pub fn set_visibility_delay(&self, queries: u32) {
        self.lock().visibility_delay = queries;
    }

    /// Reject the next `n` execute calls.
    pub fn fail_next_executes(&self, n: u32) {
        self.lock().fail_executes = n;
    }

    /// Make every query fail until cleared.
    pub fn set_fail_queries(&self, fail: bool) {
        self.lock().fail_queries = fail;
    }

    /// Seed a raw entry directly, bypassing execute. Useful for planting
    /// malformed payloads.
    pub fn insert_raw(&self, owner: &Address, collection: Collection, key: &str, data: &str) {
        self.lock()
            .upsert(owner.to_string(), collection, key.to_string(), data.to_string());
    }

    /// Whether a key is currently visible to listings.
    pub fn contains(&self, owner: &Address, collection: Collection, key: &str) -> bool {
        self.lock()
            .docs
            .get(&(owner.to_string(), collection))
            .is_some_and(|entries| entries.iter().any(|e| e.key == key))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn execute(
        &self,
        sender: &Address,
        _target: &Address,
        op: Operation,
        _fee: &FeeMode,
    ) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_executes > 0 {
            inner.fail_executes -= 1;
            return Err(StoreError::Rejected("injected execute failure".to_string()));
        }

        let owner = sender.to_string();
        match op {
            Operation::Set { collection, key, data }
            | Operation::Update { collection, key, data } => {
                if inner.visibility_delay > 0 {
                    let remaining = inner.visibility_delay;
                    inner.pending.push(PendingWrite {
                        owner,
                        collection,
                        key,
                        data,
                        remaining,
                    });
                } else {
                    inner.upsert(owner, collection, key, data);
                }
            }
            Operation::Delete { collection, key } => {
                if let Some(entries) = inner.docs.get_mut(&(owner.clone(), collection)) {
                    entries.retain(|e| e.key != key);
                }
                inner
                    .pending
                    .retain(|p| !(p.owner == owner && p.collection == collection && p.key == key));
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        _target: &Address,
        request: QueryRequest,
    ) -> Result<Option<QueryResponse>> {
        let mut inner = self.lock();
        if inner.fail_queries {
            return Err(StoreError::Query("injected query failure".to_string()));
        }

        let QueryRequest::UserDocuments { owner, collection } = request;
        let owner = owner.to_string();

        // Each listing query ticks down pending writes for this namespace;
        // writes that reach zero become visible in this response.
        let mut matured = Vec::new();
        for pending in &mut inner.pending {
            if pending.owner == owner && pending.collection == collection {
                pending.remaining -= 1;
                if pending.remaining == 0 {
                    matured.push((pending.key.clone(), pending.data.clone()));
                }
            }
        }
        inner.pending.retain(|p| p.remaining > 0);
        for (key, data) in matured {
            inner.upsert(owner.clone(), collection, key, data);
        }

        Ok(inner
            .docs
            .get(&(owner, collection))
            .map(|entries| QueryResponse { documents: entries.clone() }))
    }
}
