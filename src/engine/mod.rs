//! Pure computation for the position ledger: pricing and the position book.

pub mod book;
pub mod pricer;

pub use book::{BookChange, ListPlan, PositionBook, ReducePlan};
pub use pricer::{cost, split_fee};
