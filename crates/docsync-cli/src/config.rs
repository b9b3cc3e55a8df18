//! Environment configuration loading.
//!
//! The contract addresses have no sane default: running against the wrong
//! document store would read and write someone else's namespace, so a
//! missing or malformed address is fatal at startup. The endpoint URLs
//! default to local development nodes.

use anyhow::{Context, Result};
use docsync_core::{Address, StoreConfig};

pub const DOCSTORE_CONTRACT_VAR: &str = "DOCSTORE_CONTRACT";
pub const TREASURY_CONTRACT_VAR: &str = "TREASURY_CONTRACT";
pub const RPC_URL_VAR: &str = "DOCSTORE_RPC_URL";
pub const REST_URL_VAR: &str = "DOCSTORE_REST_URL";

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_REST_URL: &str = "http://127.0.0.1:1317";

/// Load configuration from the process environment. Fails fast rather than
/// letting the client run partially configured.
pub fn load_from_env() -> Result<StoreConfig> {
    build(
        std::env::var(DOCSTORE_CONTRACT_VAR).ok(),
        std::env::var(TREASURY_CONTRACT_VAR).ok(),
        std::env::var(RPC_URL_VAR).ok(),
        std::env::var(REST_URL_VAR).ok(),
    )
}

fn build(
    document_store: Option<String>,
    treasury: Option<String>,
    rpc_url: Option<String>,
    rest_url: Option<String>,
) -> Result<StoreConfig> {
    let document_store = require_address(DOCSTORE_CONTRACT_VAR, document_store)?;
    let treasury = require_address(TREASURY_CONTRACT_VAR, treasury)?;
    Ok(StoreConfig::new(
        document_store,
        treasury,
        rpc_url.unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
        rest_url.unwrap_or_else(|| DEFAULT_REST_URL.to_string()),
    ))
}

fn require_address(var: &str, value: Option<String>) -> Result<Address> {
    let raw = value.with_context(|| format!("{var} must be set"))?;
    raw.parse()
        .with_context(|| format!("{var} is not a valid contract address: {raw:?}"))
}
