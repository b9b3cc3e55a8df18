//! Address: identifies owners and contract targets on the ledger.
//!
//! Stored normalized (lowercase hex) so the same account written with
//! different casing compares equal.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid address {0:?}: expected 0x-prefixed 40 hex chars")]
    InvalidFormat(String),
}

/// A ledger address: `0x` followed by 40 hex characters.
///
/// Used both for the authenticated owner identity and for contract targets
/// (document store, treasury).
///
/// # Examples
/// ```
/// use docsync_core::Address;
///
/// let addr: Address = "0x00000000000000000000000000000000DeaDBeef".parse().unwrap();
/// assert_eq!(addr.as_str(), "0x00000000000000000000000000000000deadbeef");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// The normalized string form (`0x` + 40 lowercase hex chars).
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| AddressError::InvalidFormat(s.to_string()))?;
        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidFormat(s.to_string()));
        }
        Ok(Self(format!("0x{}", hex.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}
