//! Domain types for the position marketplace.
//!
//! This module provides:
//! - Fixed-point token quantities via `Amount`
//! - Domain primitives: Address, TimeMs
//! - Positions, their deterministic handles and the empty sentinel
//! - Ledger events and asset metadata

pub mod amount;
pub mod asset;
pub mod event;
pub mod position;
pub mod primitives;

pub use amount::{Amount, AmountParseError, ONE_TOKEN, TOKEN_DECIMALS};
pub use asset::AssetInfo;
pub use event::LedgerEvent;
pub use position::{HandleParseError, Position, PositionHandle, PriceBps, PAR_BPS};
pub use primitives::{Address, AddressParseError, TimeMs};
