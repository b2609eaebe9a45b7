//! Fixed-point token quantity with 18 decimals.
//!
//! Quantities are stored as integer base units (`u128`). Conversion to and from
//! human-readable token strings goes through rust_decimal so that no value is
//! ever routed through floating point.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits carried by every asset and payment token.
pub const TOKEN_DECIMALS: u32 = 18;

/// One whole token in base units.
pub const ONE_TOKEN: u128 = 1_000_000_000_000_000_000;

/// Unsigned token quantity in base units.
///
/// Serializes to a base-unit decimal string (JSON numbers cannot carry u128).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(u128);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountParseError {
    #[error("invalid number: {0}")]
    Invalid(String),
    #[error("amount must not be negative")]
    Negative,
    #[error("at most 18 fractional digits are allowed")]
    TooPrecise,
    #[error("amount out of range")]
    OutOfRange,
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_base_units(units: u128) -> Self {
        Amount(units)
    }

    /// Whole tokens, scaled to base units.
    pub fn from_tokens(tokens: u64) -> Self {
        Amount(tokens as u128 * ONE_TOKEN)
    }

    pub fn base_units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Parse a human token string such as `"7.5"` into base units.
    pub fn from_token_str(s: &str) -> Result<Self, AmountParseError> {
        let value =
            Decimal::from_str(s.trim()).map_err(|e| AmountParseError::Invalid(e.to_string()))?;
        Self::from_decimal(value)
    }

    /// Exact conversion from a token-denominated decimal.
    pub fn from_decimal(value: Decimal) -> Result<Self, AmountParseError> {
        if value.is_zero() {
            return Ok(Amount::ZERO);
        }
        if value.is_sign_negative() {
            return Err(AmountParseError::Negative);
        }
        let normalized = value.normalize();
        let scale = normalized.scale();
        if scale > TOKEN_DECIMALS {
            return Err(AmountParseError::TooPrecise);
        }
        let mantissa =
            u128::try_from(normalized.mantissa()).map_err(|_| AmountParseError::OutOfRange)?;
        mantissa
            .checked_mul(10u128.pow(TOKEN_DECIMALS - scale))
            .map(Amount)
            .ok_or(AmountParseError::OutOfRange)
    }

    /// Token-denominated view, or `None` beyond rust_decimal's 96-bit mantissa.
    pub fn to_decimal(&self) -> Option<Decimal> {
        let signed = i128::try_from(self.0).ok()?;
        Decimal::try_from_i128_with_scale(signed, TOKEN_DECIMALS)
            .ok()
            .map(|d| d.normalize())
    }

    /// Human token string, falling back to raw base units when out of range.
    pub fn to_token_string(&self) -> String {
        match self.to_decimal() {
            Some(d) => d.to_string(),
            None => format!("{}e-{}", self.0, TOKEN_DECIMALS),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    /// Parses base units (integer string).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u128>()
            .map(Amount)
            .map_err(|e| AmountParseError::Invalid(e.to_string()))
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Amount> for String {
    fn from(value: Amount) -> Self {
        value.0.to_string()
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Amount(value)
    }
}
