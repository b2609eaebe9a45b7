//! SQLite journal for committed ledger transitions.
//!
//! This module provides:
//! - Database initialization, pragmas and schema
//! - The `Repository` that writes changesets atomically and restores state

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{Changeset, JournalState, JournaledEvent, Repository};
