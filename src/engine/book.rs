//! In-memory position book: the arena of open positions and the owner index.
//!
//! Every mutation is split in two. A `plan_*` call validates against the
//! current state and describes the transition without touching anything; the
//! matching `apply_*` call commits that transition and cannot fail. Callers
//! must apply a plan to the same book state it was planned against, which the
//! marketplace guarantees by holding its lock across plan and apply.

use crate::domain::{Address, Amount, Position, PositionHandle, PriceBps};
use crate::error::LedgerError;
use std::collections::{BTreeMap, HashMap};

/// A validated listing waiting to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPlan {
    pub position: Position,
    pub seq: u64,
}

/// A validated reduction (buy or delist) waiting to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducePlan {
    /// The position as it stands before the reduction.
    pub position: Position,
    pub taken: Amount,
    pub remaining: Amount,
}

impl ListPlan {
    /// The change applying this plan will make.
    pub fn change(&self) -> BookChange {
        BookChange::Listed {
            position: self.position.clone(),
            seq: self.seq,
            next_nonce: self.position.nonce + 1,
        }
    }
}

impl ReducePlan {
    /// Whether applying this plan deletes the record.
    pub fn closes(&self) -> bool {
        self.remaining.is_zero()
    }

    /// The change applying this plan will make.
    pub fn change(&self) -> BookChange {
        if self.closes() {
            BookChange::Closed {
                handle: self.position.handle,
                owner: self.position.owner,
            }
        } else {
            BookChange::Reduced {
                handle: self.position.handle,
                units: self.remaining,
            }
        }
    }
}

/// Row-level effect of an applied plan, as persisted by the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookChange {
    Listed {
        position: Position,
        seq: u64,
        next_nonce: u64,
    },
    Reduced {
        handle: PositionHandle,
        units: Amount,
    },
    Closed {
        handle: PositionHandle,
        owner: Address,
    },
}

#[derive(Debug, Default)]
pub struct PositionBook {
    positions: HashMap<PositionHandle, Position>,
    owner_index: HashMap<Address, Vec<PositionHandle>>,
    nonces: HashMap<Address, u64>,
    next_seq: u64,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a book from journaled rows.
    ///
    /// Owner order follows `seq`, and the sequence counter resumes past the
    /// largest restored value.
    pub fn restore(
        mut positions: Vec<(Position, u64)>,
        nonces: impl IntoIterator<Item = (Address, u64)>,
    ) -> Self {
        positions.sort_by_key(|(_, seq)| *seq);

        let mut book = Self {
            nonces: nonces.into_iter().collect(),
            ..Self::default()
        };
        for (position, seq) in positions {
            book.next_seq = book.next_seq.max(seq + 1);
            let nonce_floor = book.nonces.entry(position.owner).or_insert(0);
            *nonce_floor = (*nonce_floor).max(position.nonce + 1);
            book.owner_index
                .entry(position.owner)
                .or_default()
                .push(position.handle);
            book.positions.insert(position.handle, position);
        }
        book
    }

    pub fn get(&self, handle: &PositionHandle) -> Option<&Position> {
        self.positions.get(handle)
    }

    /// Open positions of `owner` in listing order.
    pub fn positions_of(&self, owner: &Address) -> Vec<Position> {
        self.owner_index
            .get(owner)
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(|h| self.positions.get(h))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nonce the next listing by `owner` will consume.
    pub fn next_nonce(&self, owner: &Address) -> u64 {
        self.nonces.get(owner).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Units listed across all open positions, summed per asset.
    pub fn listed_by_asset(&self) -> Result<BTreeMap<Address, Amount>, LedgerError> {
        let mut totals: BTreeMap<Address, Amount> = BTreeMap::new();
        for position in self.positions.values() {
            let total = totals.entry(position.asset).or_insert(Amount::ZERO);
            *total = total
                .checked_add(position.units)
                .ok_or(LedgerError::AmountOverflow)?;
        }
        Ok(totals)
    }

    pub fn plan_list(
        &self,
        owner: Address,
        asset: Address,
        preferred_settlement_token: Address,
        units: Amount,
        price_bps: PriceBps,
    ) -> Result<ListPlan, LedgerError> {
        if units.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        if price_bps == 0 {
            return Err(LedgerError::ZeroPrice);
        }
        let nonce = self.next_nonce(&owner);
        let handle = PositionHandle::derive(&owner, &asset, nonce);

        Ok(ListPlan {
            position: Position {
                handle,
                asset,
                preferred_settlement_token,
                owner,
                units,
                price_bps,
                nonce,
            },
            seq: self.next_seq,
        })
    }

    pub fn plan_buy(
        &self,
        handle: &PositionHandle,
        units: Amount,
    ) -> Result<ReducePlan, LedgerError> {
        let position = self
            .get(handle)
            .ok_or(LedgerError::PositionNotFound(*handle))?;
        if units.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        let remaining =
            position
                .units
                .checked_sub(units)
                .ok_or(LedgerError::InsufficientUnitsAvailable {
                    requested: units,
                    available: position.units,
                })?;
        Ok(ReducePlan {
            position: position.clone(),
            taken: units,
            remaining,
        })
    }

    pub fn plan_delist(
        &self,
        caller: &Address,
        handle: &PositionHandle,
        units: Amount,
    ) -> Result<ReducePlan, LedgerError> {
        let position = self
            .get(handle)
            .ok_or(LedgerError::PositionNotFound(*handle))?;
        if position.owner != *caller {
            return Err(LedgerError::Unauthorized { caller: *caller });
        }
        if units.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        let remaining =
            position
                .units
                .checked_sub(units)
                .ok_or(LedgerError::InsufficientUnitsListed {
                    requested: units,
                    listed: position.units,
                })?;
        Ok(ReducePlan {
            position: position.clone(),
            taken: units,
            remaining,
        })
    }

    pub fn apply_list(&mut self, plan: ListPlan) -> BookChange {
        let change = plan.change();
        let ListPlan { position, seq } = plan;

        self.nonces.insert(position.owner, position.nonce + 1);
        self.next_seq = seq + 1;
        self.owner_index
            .entry(position.owner)
            .or_default()
            .push(position.handle);
        self.positions.insert(position.handle, position);
        debug_assert!(self.is_consistent());
        change
    }

    pub fn apply_reduce(&mut self, plan: &ReducePlan) -> BookChange {
        let handle = plan.position.handle;
        let owner = plan.position.owner;

        if plan.closes() {
            self.positions.remove(&handle);
            if let Some(handles) = self.owner_index.get_mut(&owner) {
                handles.retain(|h| *h != handle);
                if handles.is_empty() {
                    self.owner_index.remove(&owner);
                }
            }
        } else if let Some(position) = self.positions.get_mut(&handle) {
            position.units = plan.remaining;
        }
        debug_assert!(self.is_consistent());
        plan.change()
    }

    /// Arena and owner index agree, and no record holds zero units.
    pub fn is_consistent(&self) -> bool {
        let indexed: usize = self.owner_index.values().map(Vec::len).sum();
        indexed == self.positions.len()
            && self.owner_index.iter().all(|(owner, handles)| {
                !handles.is_empty()
                    && handles.iter().all(|h| {
                        self.positions
                            .get(h)
                            .is_some_and(|p| p.owner == *owner)
                    })
            })
            && self.positions.values().all(|p| !p.units.is_zero())
    }
}
