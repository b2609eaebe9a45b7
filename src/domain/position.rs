//! Resale positions and their deterministic handles.

use crate::domain::{Address, Amount};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Price expressed in basis points of par (10000 = 1.0x).
pub type PriceBps = u32;

/// Basis points that make up par.
pub const PAR_BPS: PriceBps = 10_000;

/// Stable 32-byte identifier of a position.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PositionHandle([u8; 32]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleParseError {
    #[error("handle must be 0x followed by 64 hex characters")]
    InvalidFormat,
}

impl PositionHandle {
    pub const ZERO: PositionHandle = PositionHandle([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        PositionHandle(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the handle for a listing.
    ///
    /// The preimage is `owner || asset || nonce` with the nonce big-endian, so
    /// every field has a fixed width and no two tuples share an encoding.
    pub fn derive(owner: &Address, asset: &Address, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(owner.as_bytes());
        hasher.update(asset.as_bytes());
        hasher.update(nonce.to_be_bytes());
        PositionHandle(hasher.finalize().into())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl FromStr for PositionHandle {
    type Err = HandleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .trim()
            .strip_prefix("0x")
            .ok_or(HandleParseError::InvalidFormat)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| HandleParseError::InvalidFormat)?;
        Ok(PositionHandle(bytes))
    }
}

impl TryFrom<String> for PositionHandle {
    type Error = HandleParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PositionHandle> for String {
    fn from(value: PositionHandle) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PositionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PositionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PositionHandle({})", self)
    }
}

/// A listed resale offer held in ledger custody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub handle: PositionHandle,
    pub asset: Address,
    pub preferred_settlement_token: Address,
    pub owner: Address,
    /// Units still available for sale.
    pub units: Amount,
    pub price_bps: PriceBps,
    pub nonce: u64,
}

impl Position {
    /// Value returned by the compatibility lookup for an unknown handle.
    pub const EMPTY: Position = Position {
        handle: PositionHandle::ZERO,
        asset: Address::ZERO,
        preferred_settlement_token: Address::ZERO,
        owner: Address::ZERO,
        units: Amount::ZERO,
        price_bps: 0,
        nonce: 0,
    };

    pub fn is_empty(&self) -> bool {
        *self == Position::EMPTY
    }
}
