//! Operation sequencing over the position book and the token collaborators.

pub mod marketplace;
pub mod settlement;

pub use marketplace::{Marketplace, MarketplaceParams};
pub use settlement::Settlement;
