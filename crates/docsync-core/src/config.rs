//! Process configuration for the document store client.
//!
//! Built once at startup (the CLI reads environment variables, a host app
//! passes its own values) and handed to controllers by reference. There is
//! deliberately no ambient global: missing configuration fails construction
//! at the boundary instead of surfacing mid-session.

use crate::address::Address;
use crate::store::FeeMode;

/// Addresses and endpoints the client needs to talk to the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// The document store contract all operations target.
    pub document_store: Address,
    /// The treasury contract sponsoring transaction fees.
    pub treasury: Address,
    /// JSON-RPC node endpoint (used by the signing SDK behind the store).
    pub rpc_url: String,
    /// REST gateway endpoint.
    pub rest_url: String,
}

impl StoreConfig {
    pub fn new(
        document_store: Address,
        treasury: Address,
        rpc_url: impl Into<String>,
        rest_url: impl Into<String>,
    ) -> Self {
        Self {
            document_store,
            treasury,
            rpc_url: rpc_url.into(),
            rest_url: rest_url.into(),
        }
    }

    /// The fee mode controllers submit with: treasury-sponsored, so users
    /// never need gas of their own.
    pub fn sponsored_fee(&self) -> FeeMode {
        FeeMode::Sponsored {
            treasury: self.treasury.clone(),
        }
    }
}
