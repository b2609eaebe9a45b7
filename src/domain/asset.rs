//! Asset-token class metadata as exposed by an asset factory.

use crate::domain::{Address, Amount};
use serde::{Deserialize, Serialize};

/// Metadata of one asset-token class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInfo {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    /// Off-chain document (deed, prospectus) describing the backing.
    pub url: String,
    /// Units issued so far across all holders.
    pub issued_units: Amount,
}
