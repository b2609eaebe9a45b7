//! Admin-controlled state: the allowed payment tokens and single-slot settings.

use crate::domain::{Address, PriceBps, PAR_BPS};
use crate::error::LedgerError;
use std::collections::BTreeSet;

/// Payment tokens accepted for entering and listing positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedTokens {
    tokens: BTreeSet<Address>,
}

impl AllowedTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle membership. Returns whether membership changed.
    pub fn set(&mut self, token: Address, allowed: bool) -> bool {
        if allowed {
            self.tokens.insert(token)
        } else {
            self.tokens.remove(&token)
        }
    }

    pub fn is_allowed(&self, token: &Address) -> bool {
        self.tokens.contains(token)
    }

    pub fn ensure_allowed(&self, token: &Address) -> Result<(), LedgerError> {
        if self.is_allowed(token) {
            Ok(())
        } else {
            Err(LedgerError::TokenNotAllowed(*token))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.tokens.iter()
    }
}

impl FromIterator<Address> for AllowedTokens {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

/// Settings read at the point of use by every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSettings {
    /// The only caller allowed to change admin state.
    pub authority: Address,
    /// Destination of protocol fees and of entry payments.
    pub vault: Option<Address>,
    /// Asset factory consulted for asset lookups and issuance.
    pub factory: Option<Address>,
    /// Share of each sale's cost routed to the vault. Defaults to zero.
    pub protocol_fee_bps: PriceBps,
}

impl AdminSettings {
    pub fn new(authority: Address) -> Self {
        Self {
            authority,
            vault: None,
            factory: None,
            protocol_fee_bps: 0,
        }
    }

    pub fn ensure_authority(&self, caller: &Address) -> Result<(), LedgerError> {
        if *caller == self.authority {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized { caller: *caller })
        }
    }

    pub fn factory(&self) -> Result<Address, LedgerError> {
        self.factory.ok_or(LedgerError::FactoryNotConfigured)
    }

    pub fn validate_fee(fee_bps: PriceBps) -> Result<(), LedgerError> {
        if fee_bps > PAR_BPS {
            Err(LedgerError::InvalidFee(fee_bps))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn test_allowed_tokens_toggle() {
        let mut allowed = AllowedTokens::new();
        assert!(!allowed.is_allowed(&addr(1)));
        assert!(allowed.set(addr(1), true));
        assert!(!allowed.set(addr(1), true));
        assert!(allowed.is_allowed(&addr(1)));
        assert!(allowed.ensure_allowed(&addr(1)).is_ok());

        assert!(allowed.set(addr(1), false));
        assert!(matches!(
            allowed.ensure_allowed(&addr(1)),
            Err(LedgerError::TokenNotAllowed(t)) if t == addr(1)
        ));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = AdminSettings::new(addr(9));
        assert_eq!(settings.protocol_fee_bps, 0);
        assert!(settings.vault.is_none());
        assert!(matches!(
            settings.factory(),
            Err(LedgerError::FactoryNotConfigured)
        ));
    }

    #[test]
    fn test_ensure_authority() {
        let settings = AdminSettings::new(addr(9));
        assert!(settings.ensure_authority(&addr(9)).is_ok());
        assert!(matches!(
            settings.ensure_authority(&addr(1)),
            Err(LedgerError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_validate_fee() {
        assert!(AdminSettings::validate_fee(0).is_ok());
        assert!(AdminSettings::validate_fee(10_000).is_ok());
        assert!(AdminSettings::validate_fee(10_001).is_err());
    }
}
