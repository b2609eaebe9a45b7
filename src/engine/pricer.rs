//! Basis-point pricing.

use crate::domain::{Amount, PriceBps, PAR_BPS};
use crate::error::LedgerError;

/// Payment owed for `units` at `price_bps` of par.
///
/// `floor(units * price_bps / 10000)`; the remainder is dropped, never rounded up.
pub fn cost(units: Amount, price_bps: PriceBps) -> Result<Amount, LedgerError> {
    scale_bps(units, price_bps)
}

/// Split a sale's cost into `(seller_proceeds, protocol_fee)`.
///
/// The fee is `floor(cost * fee_bps / 10000)`, so the seller keeps the rounding dust.
pub fn split_fee(cost: Amount, fee_bps: PriceBps) -> Result<(Amount, Amount), LedgerError> {
    if fee_bps > PAR_BPS {
        return Err(LedgerError::InvalidFee(fee_bps));
    }
    let fee = scale_bps(cost, fee_bps)?;
    let proceeds = cost.checked_sub(fee).ok_or(LedgerError::AmountOverflow)?;
    Ok((proceeds, fee))
}

fn scale_bps(amount: Amount, bps: PriceBps) -> Result<Amount, LedgerError> {
    amount
        .base_units()
        .checked_mul(u128::from(bps))
        .map(|scaled| Amount::from_base_units(scaled / u128::from(PAR_BPS)))
        .ok_or(LedgerError::AmountOverflow)
}
