//! In-memory token balances and asset factory for tests and the sandbox node.

use super::{AssetRegistry, TokenTransfer, TransferError};
use crate::domain::{Address, Amount, AssetInfo};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Balances {
    by_holder: HashMap<(Address, Address), Amount>,
    failing_tokens: HashSet<Address>,
    /// Fail the transfer once this many more transfers have succeeded.
    fail_after: Option<usize>,
    transfers: usize,
}

impl Balances {
    fn balance(&self, token: &Address, holder: &Address) -> Amount {
        self.by_holder
            .get(&(*token, *holder))
            .copied()
            .unwrap_or_default()
    }

    fn credit(&mut self, token: &Address, to: &Address, amount: Amount) -> Result<(), TransferError> {
        let current = self.balance(token, to);
        let next = current.checked_add(amount).ok_or(TransferError::Overflow)?;
        self.by_holder.insert((*token, *to), next);
        Ok(())
    }

    fn debit(
        &mut self,
        token: &Address,
        from: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let available = self.balance(token, from);
        let next = available
            .checked_sub(amount)
            .ok_or(TransferError::InsufficientBalance {
                token: *token,
                holder: *from,
                required: amount,
                available,
            })?;
        if next.is_zero() {
            self.by_holder.remove(&(*token, *from));
        } else {
            self.by_holder.insert((*token, *from), next);
        }
        Ok(())
    }
}

/// Balance sheet for any number of tokens, with failure injection.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTokens {
    inner: Arc<Mutex<Balances>>,
}

impl InMemoryTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `amount` of `token` out of thin air for `to`.
    pub async fn mint(
        &self,
        token: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        self.inner.lock().await.credit(token, to, amount)
    }

    /// Destroy `amount` of `token` held by `from`.
    pub async fn burn(
        &self,
        token: &Address,
        from: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        self.inner.lock().await.debit(token, from, amount)
    }

    /// Make every transfer of `token` fail until `heal_token` is called.
    pub async fn fail_token(&self, token: Address) {
        self.inner.lock().await.failing_tokens.insert(token);
    }

    pub async fn heal_token(&self, token: &Address) {
        self.inner.lock().await.failing_tokens.remove(token);
    }

    /// Let `successes` more transfers through, then fail exactly one.
    pub async fn fail_after(&self, successes: usize) {
        self.inner.lock().await.fail_after = Some(successes);
    }

    /// Number of transfers that completed.
    pub async fn transfer_count(&self) -> usize {
        self.inner.lock().await.transfers
    }

    /// Sum of all balances of `token`.
    pub async fn total_supply(&self, token: &Address) -> Amount {
        let inner = self.inner.lock().await;
        inner
            .by_holder
            .iter()
            .filter(|((t, _), _)| t == token)
            .fold(Amount::ZERO, |acc, (_, amount)| {
                acc.checked_add(*amount).unwrap_or(acc)
            })
    }
}

#[async_trait]
impl TokenTransfer for InMemoryTokens {
    async fn balance_of(&self, token: &Address, holder: &Address) -> Result<Amount, TransferError> {
        Ok(self.inner.lock().await.balance(token, holder))
    }

    async fn transfer(
        &self,
        token: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let mut inner = self.inner.lock().await;
        if inner.failing_tokens.contains(token) {
            return Err(TransferError::Rejected(format!("token {} is paused", token)));
        }
        if let Some(remaining) = inner.fail_after {
            if remaining == 0 {
                inner.fail_after = None;
                return Err(TransferError::Unavailable("injected failure".to_string()));
            }
            inner.fail_after = Some(remaining - 1);
        }

        inner.debit(token, from, amount)?;
        if let Err(e) = inner.credit(token, to, amount) {
            // Put the debited amount back; credit to `from` cannot overflow
            // since it held this amount a moment ago.
            let _ = inner.credit(token, from, amount);
            return Err(e);
        }
        inner.transfers += 1;
        Ok(())
    }
}

/// Asset factory that issues asset units into an `InMemoryTokens` sheet.
#[derive(Debug, Clone)]
pub struct InMemoryAssetFactory {
    address: Address,
    tokens: InMemoryTokens,
    assets: Arc<Mutex<HashMap<Address, AssetInfo>>>,
}

impl InMemoryAssetFactory {
    pub fn new(address: Address, tokens: InMemoryTokens) -> Self {
        Self {
            address,
            tokens,
            assets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Register a new asset class and issue `initial_units` to `creator`.
    ///
    /// The asset address is derived from the factory address and a running
    /// counter, so the same sequence of creations yields the same addresses.
    pub async fn create_asset(
        &self,
        creator: &Address,
        name: &str,
        symbol: &str,
        url: &str,
        initial_units: Amount,
    ) -> Result<Address, TransferError> {
        let mut assets = self.assets.lock().await;

        let mut hasher = Sha256::new();
        hasher.update(self.address.as_bytes());
        hasher.update((assets.len() as u64).to_be_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        let address = Address::from_bytes(bytes);

        if !initial_units.is_zero() {
            self.tokens.mint(&address, creator, initial_units).await?;
        }
        assets.insert(
            address,
            AssetInfo {
                address,
                name: name.to_string(),
                symbol: symbol.to_string(),
                url: url.to_string(),
                issued_units: initial_units,
            },
        );
        tracing::info!(asset = %address, symbol, "asset created");
        Ok(address)
    }

    pub async fn update_asset_url(&self, asset: &Address, url: &str) -> Result<(), TransferError> {
        let mut assets = self.assets.lock().await;
        let info = assets.get_mut(asset).ok_or(TransferError::UnknownAsset {
            factory: self.address,
            asset: *asset,
        })?;
        info.url = url.to_string();
        Ok(())
    }

    pub async fn asset_url(&self, asset: &Address) -> Option<String> {
        self.assets.lock().await.get(asset).map(|a| a.url.clone())
    }

    fn unknown(&self, asset: &Address) -> TransferError {
        TransferError::UnknownAsset {
            factory: self.address,
            asset: *asset,
        }
    }
}

#[async_trait]
impl AssetRegistry for InMemoryAssetFactory {
    async fn asset_info(
        &self,
        factory: &Address,
        asset: &Address,
    ) -> Result<Option<AssetInfo>, TransferError> {
        if *factory != self.address {
            return Ok(None);
        }
        Ok(self.assets.lock().await.get(asset).cloned())
    }

    async fn issue_units(
        &self,
        factory: &Address,
        asset: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let mut assets = self.assets.lock().await;
        let info = assets
            .get_mut(asset)
            .filter(|_| *factory == self.address)
            .ok_or_else(|| self.unknown(asset))?;
        let issued = info
            .issued_units
            .checked_add(amount)
            .ok_or(TransferError::Overflow)?;
        self.tokens.mint(asset, to, amount).await?;
        info.issued_units = issued;
        Ok(())
    }

    async fn retire_units(
        &self,
        factory: &Address,
        asset: &Address,
        from: &Address,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let mut assets = self.assets.lock().await;
        let info = assets
            .get_mut(asset)
            .filter(|_| *factory == self.address)
            .ok_or_else(|| self.unknown(asset))?;
        self.tokens.burn(asset, from, amount).await?;
        info.issued_units = info.issued_units.checked_sub(amount).unwrap_or_default();
        Ok(())
    }
}
