//! Boundary to the external token custody and asset registry collaborators.
//!
//! The ledger never moves tokens itself. It asks these collaborators to, and
//! relies on each call being all-or-nothing.

use crate::domain::{Address, Amount, AssetInfo};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod memory;

pub use memory::{InMemoryAssetFactory, InMemoryTokens};

/// Moves fungible tokens (payment tokens and asset units) between holders.
#[async_trait]
pub trait TokenTransfer: Send + Sync + fmt::Debug {
    /// Current balance of `holder` in `token`.
    async fn balance_of(&self, token: &Address, holder: &Address) -> Result<Amount, TransferError>;

    /// Move `amount` of `token` from `from` to `to`.
    ///
    /// Either the whole amount moves or nothing does.
    async fn transfer(
        &self,
        token: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TransferError>;
}

/// Registry of asset-token classes, addressed through its factory address.
#[async_trait]
pub trait AssetRegistry: Send + Sync + fmt::Debug {
    /// Metadata for `asset`, or `None` when the factory does not know it.
    async fn asset_info(
        &self,
        factory: &Address,
        asset: &Address,
    ) -> Result<Option<AssetInfo>, TransferError>;

    /// Credit `amount` freshly issued units of `asset` to `to`.
    async fn issue_units(
        &self,
        factory: &Address,
        asset: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TransferError>;

    /// Withdraw previously issued units from `from`. Used to unwind an entry.
    async fn retire_units(
        &self,
        factory: &Address,
        asset: &Address,
        from: &Address,
        amount: Amount,
    ) -> Result<(), TransferError>;
}

/// Failure reported by a token collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("{holder} holds {available} of {token}, {required} required")]
    InsufficientBalance {
        token: Address,
        holder: Address,
        required: Amount,
        available: Amount,
    },
    #[error("asset {asset} unknown to factory {factory}")]
    UnknownAsset { factory: Address, asset: Address },
    #[error("balance overflow")]
    Overflow,
    #[error("transfer rejected: {0}")]
    Rejected(String),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}
