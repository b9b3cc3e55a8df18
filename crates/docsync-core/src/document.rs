//! Document payloads stored in the remote key-value store.
//!
//! The store itself enforces no schema; each collection's shape is defined
//! here. Field casing matches what the contract already holds: todos use
//! snake_case, profile and settings use camelCase.

use crate::address::Address;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// A named partition of documents scoped to an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Todos,
    Profiles,
    Settings,
}

impl Collection {
    /// Wire name of the collection.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Todos => "todos",
            Collection::Profiles => "profiles",
            Collection::Settings => "settings",
        }
    }

    /// Collections that hold at most one document per owner, keyed by the
    /// owner address. For these, create and update are the same upsert.
    pub fn single_document(&self) -> bool {
        matches!(self, Collection::Profiles | Collection::Settings)
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A payload type bound to its collection.
///
/// Implementations tell the controller which collection they live in, how the
/// document key is derived, and (for multi-document collections) which
/// timestamp drives recency ordering.
pub trait CollectionDocument:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// The collection this payload belongs to.
    const COLLECTION: Collection;

    /// The store key for this document. Single-document collections key by
    /// the owner address; todos carry their own id.
    fn document_key(&self, owner: &Address) -> String;

    /// Timestamp used for recency ordering, newest first. `None` means the
    /// collection has no implied ordering.
    fn created_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// A single todo item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub title: String,
    pub text: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl Todo {
    /// Create a new open todo with a time-based id.
    ///
    /// Millisecond timestamps make collisions within a single owner's
    /// activity astronomically unlikely; the store is per-key
    /// last-write-wins regardless.
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: now.timestamp_millis().to_string(),
            title: title.into(),
            text: text.into(),
            completed: false,
            created_at: now,
        }
    }

    /// Flip the completion flag.
    pub fn toggle(&mut self) {
        self.completed = !self.completed;
    }
}

impl CollectionDocument for Todo {
    const COLLECTION: Collection = Collection::Todos;

    fn document_key(&self, _owner: &Address) -> String {
        self.id.clone()
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

/// Public profile for an owner. At most one per owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub display_name: String,
    pub bio: String,
    pub avatar: String,
    #[serde(default)]
    pub social_links: SocialLinks,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl CollectionDocument for Profile {
    const COLLECTION: Collection = Collection::Profiles;

    fn document_key(&self, owner: &Address) -> String {
        owner.to_string()
    }
}

/// Per-owner application settings. At most one per owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub dark_mode: bool,
    pub notifications: bool,
    pub language: String,
    pub timezone: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dark_mode: false,
            notifications: true,
            language: "en".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

impl CollectionDocument for Settings {
    const COLLECTION: Collection = Collection::Settings;

    fn document_key(&self, owner: &Address) -> String {
        owner.to_string()
    }
}
