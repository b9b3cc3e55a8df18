//! docsync-core: client-side sync for a contract-backed document store.
//!
//! This crate provides the core functionality for:
//! - Typed document payloads per collection (todos, profile, settings)
//! - The `DocumentStore` trait abstraction over the remote executor
//! - `SyncController`: local cache reconciliation, optimistic updates, and
//!   confirmation polling under eventual consistency
//! - Bounded retry with exponential backoff for read paths

pub mod address;
pub mod config;
pub mod controller;
pub mod document;
pub mod events;
pub mod retry;
pub mod store;

pub use address::{Address, AddressError};
pub use config::StoreConfig;
pub use controller::{ControllerError, SessionState, SyncController, SyncOptions};
pub use document::{Collection, CollectionDocument, Profile, Settings, SocialLinks, Todo};
pub use events::{EventBus, MutationKind, Subscription, SyncEvent};
pub use store::{
    DocumentEntry, DocumentStore, FeeMode, InMemoryStore, Operation, QueryRequest, QueryResponse,
    StoreError,
};
