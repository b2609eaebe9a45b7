pub mod admin;
pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod token;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{Address, Amount, AssetInfo, LedgerEvent, Position, PositionHandle, PriceBps};
pub use error::{AppError, LedgerError};
pub use orchestration::{Marketplace, MarketplaceParams};
pub use token::{AssetRegistry, InMemoryAssetFactory, InMemoryTokens, TokenTransfer, TransferError};
