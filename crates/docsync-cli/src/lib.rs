//! docsync-cli library: exposes internal modules for testing.
//!
//! This is a thin library layer over the CLI components, allowing
//! integration tests to access configuration loading and the HTTP store.

pub mod config;
pub mod http_store;

pub use http_store::HttpStore;
