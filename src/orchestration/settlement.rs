//! Token movements of a single ledger call, with reverse-order compensation.

use crate::domain::{Address, Amount};
use crate::error::LedgerError;
use crate::token::{AssetRegistry, TokenTransfer, TransferError};
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Movement {
    Transfer {
        token: Address,
        from: Address,
        to: Address,
        amount: Amount,
    },
    Issue {
        factory: Address,
        asset: Address,
        to: Address,
        amount: Amount,
    },
}

/// Records every movement made for one call so it can be undone.
pub struct Settlement<'a> {
    tokens: &'a dyn TokenTransfer,
    registry: &'a dyn AssetRegistry,
    done: Vec<Movement>,
}

impl<'a> Settlement<'a> {
    pub fn new(tokens: &'a dyn TokenTransfer, registry: &'a dyn AssetRegistry) -> Self {
        Self {
            tokens,
            registry,
            done: Vec::new(),
        }
    }

    /// Zero amounts are skipped.
    pub async fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.tokens.transfer(&token, &from, &to, amount).await?;
        self.done.push(Movement::Transfer {
            token,
            from,
            to,
            amount,
        });
        Ok(())
    }

    pub async fn issue(
        &mut self,
        factory: Address,
        asset: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        self.registry.issue_units(&factory, &asset, &to, amount).await?;
        self.done.push(Movement::Issue {
            factory,
            asset,
            to,
            amount,
        });
        Ok(())
    }

    pub fn movements(&self) -> usize {
        self.done.len()
    }

    /// Reverse every recorded movement, newest first.
    ///
    /// Returns false if any reversal failed; the remaining reversals are still
    /// attempted.
    pub async fn unwind(self) -> bool {
        let mut all_reversed = true;
        for movement in self.done.into_iter().rev() {
            let result = match &movement {
                Movement::Transfer {
                    token,
                    from,
                    to,
                    amount,
                } => self.tokens.transfer(token, to, from, *amount).await,
                Movement::Issue {
                    factory,
                    asset,
                    to,
                    amount,
                } => self.registry.retire_units(factory, asset, to, *amount).await,
            };
            match result {
                Ok(()) => warn!(?movement, "movement reversed"),
                Err(e) => {
                    error!(?movement, error = %e, "movement could not be reversed");
                    all_reversed = false;
                }
            }
        }
        all_reversed
    }

    /// Undo everything after a failed movement and describe the outcome.
    pub async fn abort(self, source: TransferError) -> LedgerError {
        let compensated = self.unwind().await;
        LedgerError::TransferFailed {
            source,
            compensated,
        }
    }

    /// Undo everything after the journal refused the changeset.
    ///
    /// When the reversal itself fails the caller must reconcile balances, so
    /// the error is reported as an uncompensated transfer failure.
    pub async fn abort_after_journal(self, err: sqlx::Error) -> LedgerError {
        if self.unwind().await {
            LedgerError::Storage(err)
        } else {
            LedgerError::TransferFailed {
                source: TransferError::Rejected(format!(
                    "reversal after journal failure ({}) did not complete",
                    err
                )),
                compensated: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{InMemoryAssetFactory, InMemoryTokens};

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[tokio::test]
    async fn test_unwind_restores_balances() {
        let tokens = InMemoryTokens::new();
        let factory = InMemoryAssetFactory::new(addr(0xF0), tokens.clone());
        let usd = addr(0xEE);
        tokens.mint(&usd, &addr(1), Amount::from_tokens(10)).await.unwrap();

        let mut settlement = Settlement::new(&tokens, &factory);
        settlement
            .transfer(usd, addr(1), addr(2), Amount::from_tokens(4))
            .await
            .unwrap();
        settlement
            .transfer(usd, addr(2), addr(3), Amount::from_tokens(1))
            .await
            .unwrap();
        settlement
            .transfer(usd, addr(2), addr(3), Amount::ZERO)
            .await
            .unwrap();
        assert_eq!(settlement.movements(), 2);

        assert!(settlement.unwind().await);
        assert_eq!(
            tokens.balance_of(&usd, &addr(1)).await.unwrap(),
            Amount::from_tokens(10)
        );
        assert_eq!(tokens.balance_of(&usd, &addr(2)).await.unwrap(), Amount::ZERO);
        assert_eq!(tokens.balance_of(&usd, &addr(3)).await.unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_abort_reports_compensation_failure() {
        let tokens = InMemoryTokens::new();
        let factory = InMemoryAssetFactory::new(addr(0xF0), tokens.clone());
        let usd = addr(0xEE);
        tokens.mint(&usd, &addr(1), Amount::from_tokens(1)).await.unwrap();

        let mut settlement = Settlement::new(&tokens, &factory);
        settlement
            .transfer(usd, addr(1), addr(2), Amount::from_tokens(1))
            .await
            .unwrap();
        tokens.fail_token(usd).await;

        let err = settlement
            .abort(TransferError::Unavailable("boom".to_string()))
            .await;
        assert!(matches!(
            err,
            LedgerError::TransferFailed {
                compensated: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unwind_retires_issued_units() {
        let tokens = InMemoryTokens::new();
        let factory = InMemoryAssetFactory::new(addr(0xF0), tokens.clone());
        let asset = factory
            .create_asset(&addr(1), "A", "A", "", Amount::ZERO)
            .await
            .unwrap();

        let mut settlement = Settlement::new(&tokens, &factory);
        settlement
            .issue(addr(0xF0), asset, addr(1), Amount::from_tokens(3))
            .await
            .unwrap();
        assert!(settlement.unwind().await);
        assert_eq!(tokens.total_supply(&asset).await, Amount::ZERO);
    }
}
