//! Ledger events published to indexers and recorded in the journal.

use crate::domain::{Address, Amount, PositionHandle, PriceBps};
use serde::{Deserialize, Serialize};

/// Observable outcome of a committed ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LedgerEvent {
    #[serde(rename_all = "camelCase")]
    PositionEntered {
        owner: Address,
        asset: Address,
        payment_token: Address,
        amount: Amount,
    },
    #[serde(rename_all = "camelCase")]
    ListedPositionForSale {
        owner: Address,
        asset: Address,
        preferred_settlement_token: Address,
        units: Amount,
        price_bps: PriceBps,
        handle: PositionHandle,
    },
    #[serde(rename_all = "camelCase")]
    PositionBought {
        handle: PositionHandle,
        buyer: Address,
        seller: Address,
        units: Amount,
        cost: Amount,
        fee: Amount,
        remaining_units: Amount,
    },
    #[serde(rename_all = "camelCase")]
    PositionDelisted {
        handle: PositionHandle,
        owner: Address,
        units: Amount,
        remaining_units: Amount,
    },
    /// Units reached zero and the record was removed.
    #[serde(rename_all = "camelCase")]
    PositionClosed { handle: PositionHandle, owner: Address },
    #[serde(rename_all = "camelCase")]
    AllowedTokenSet { token: Address, allowed: bool },
    #[serde(rename_all = "camelCase")]
    VaultAddressSet { vault: Address },
    #[serde(rename_all = "camelCase")]
    FactoryAddressSet { factory: Address },
    #[serde(rename_all = "camelCase")]
    ProtocolFeeSet { fee_bps: PriceBps },
}

impl LedgerEvent {
    /// Short name used as the journal `kind` column.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::PositionEntered { .. } => "position_entered",
            LedgerEvent::ListedPositionForSale { .. } => "listed_position_for_sale",
            LedgerEvent::PositionBought { .. } => "position_bought",
            LedgerEvent::PositionDelisted { .. } => "position_delisted",
            LedgerEvent::PositionClosed { .. } => "position_closed",
            LedgerEvent::AllowedTokenSet { .. } => "allowed_token_set",
            LedgerEvent::VaultAddressSet { .. } => "vault_address_set",
            LedgerEvent::FactoryAddressSet { .. } => "factory_address_set",
            LedgerEvent::ProtocolFeeSet { .. } => "protocol_fee_set",
        }
    }

    /// Position the event refers to, if any.
    pub fn handle(&self) -> Option<PositionHandle> {
        match self {
            LedgerEvent::ListedPositionForSale { handle, .. }
            | LedgerEvent::PositionBought { handle, .. }
            | LedgerEvent::PositionDelisted { handle, .. }
            | LedgerEvent::PositionClosed { handle, .. } => Some(*handle),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = LedgerEvent::PositionClosed {
            handle: PositionHandle::ZERO,
            owner: Address::ZERO,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "positionClosed");
        assert_eq!(event.kind(), "position_closed");
        assert_eq!(event.handle(), Some(PositionHandle::ZERO));
    }

    #[test]
    fn test_admin_events_have_no_handle() {
        let event = LedgerEvent::ProtocolFeeSet { fee_bps: 25 };
        assert_eq!(event.handle(), None);
        let back: LedgerEvent =
            serde_json::from_value(serde_json::to_value(&event).unwrap()).unwrap();
        assert_eq!(back, event);
    }
}
