//! The marketplace service: the single writer over the position ledger.
//!
//! Every public operation takes the state lock for its whole duration, so
//! operations are totally ordered and no call observes another's half-done
//! work. Within a call the order is fixed: validate and plan, move tokens,
//! journal the changeset, apply it in memory, publish events.

use crate::admin::{AdminSettings, AllowedTokens};
use crate::config::Config;
use crate::db::{Changeset, JournaledEvent, Repository};
use crate::domain::{Address, Amount, AssetInfo, LedgerEvent, Position, PositionHandle, PriceBps};
use crate::engine::{self, ListPlan, PositionBook, ReducePlan};
use crate::error::LedgerError;
use crate::orchestration::settlement::Settlement;
use crate::token::{AssetRegistry, TokenTransfer, TransferError};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

/// Construction parameters, usually taken from `Config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceParams {
    pub authority: Address,
    /// Escrow account holding listed units.
    pub custody: Address,
    pub vault: Option<Address>,
    pub factory: Option<Address>,
    pub protocol_fee_bps: PriceBps,
    pub allowed_tokens: Vec<Address>,
    pub event_buffer: usize,
}

impl MarketplaceParams {
    pub fn new(authority: Address, custody: Address) -> Self {
        Self {
            authority,
            custody,
            vault: None,
            factory: None,
            protocol_fee_bps: 0,
            allowed_tokens: Vec::new(),
            event_buffer: 1024,
        }
    }
}

impl From<&Config> for MarketplaceParams {
    fn from(config: &Config) -> Self {
        Self {
            authority: config.admin_address,
            custody: config.custody_address,
            vault: config.vault_address,
            factory: config.factory_address,
            protocol_fee_bps: config.protocol_fee_bps,
            allowed_tokens: config.allowed_tokens.clone(),
            event_buffer: config.event_buffer,
        }
    }
}

struct LedgerState {
    book: PositionBook,
    allowed: AllowedTokens,
    settings: AdminSettings,
}

/// What a buy will move, computed before anything moves.
struct BuyQuote {
    plan: ReducePlan,
    cost: Amount,
    proceeds: Amount,
    fee: Amount,
    fee_to: Address,
}

pub struct Marketplace {
    state: Mutex<LedgerState>,
    tokens: Arc<dyn TokenTransfer>,
    registry: Arc<dyn AssetRegistry>,
    journal: Option<Arc<Repository>>,
    custody: Address,
    events: broadcast::Sender<LedgerEvent>,
}

impl Marketplace {
    /// Build a marketplace with no journal.
    pub fn new(
        params: MarketplaceParams,
        tokens: Arc<dyn TokenTransfer>,
        registry: Arc<dyn AssetRegistry>,
    ) -> Result<Self, LedgerError> {
        AdminSettings::validate_fee(params.protocol_fee_bps)?;
        let settings = AdminSettings {
            authority: params.authority,
            vault: params.vault,
            factory: params.factory,
            protocol_fee_bps: params.protocol_fee_bps,
        };
        let state = LedgerState {
            book: PositionBook::new(),
            allowed: params.allowed_tokens.iter().copied().collect(),
            settings,
        };
        let (events, _) = broadcast::channel(params.event_buffer.max(1));

        Ok(Self {
            state: Mutex::new(state),
            tokens,
            registry,
            journal: None,
            custody: params.custody,
            events,
        })
    }

    /// Build a marketplace backed by a journal, restoring its committed state.
    ///
    /// On an empty journal the configured allowed tokens and settings are
    /// recorded as the initial admin state; afterwards the journal wins.
    /// A restored book must be backed by the token and asset collaborators:
    /// custody has to hold every listed unit, or `open` fails with
    /// `EscrowMismatch`.
    pub async fn open(
        params: MarketplaceParams,
        tokens: Arc<dyn TokenTransfer>,
        registry: Arc<dyn AssetRegistry>,
        journal: Arc<Repository>,
    ) -> Result<Self, LedgerError> {
        let mut marketplace = Self::new(params.clone(), tokens, registry)?;
        let fresh = journal.query_events(None, 1).await?.is_empty();

        if fresh {
            let mut events: Vec<LedgerEvent> = params
                .allowed_tokens
                .iter()
                .map(|token| LedgerEvent::AllowedTokenSet {
                    token: *token,
                    allowed: true,
                })
                .collect();
            events.extend(params.vault.map(|vault| LedgerEvent::VaultAddressSet { vault }));
            events.extend(
                params
                    .factory
                    .map(|factory| LedgerEvent::FactoryAddressSet { factory }),
            );
            events.push(LedgerEvent::ProtocolFeeSet {
                fee_bps: params.protocol_fee_bps,
            });
            journal.commit(&Changeset { book: None, events }).await?;
            info!("journal initialized from configuration");
        } else {
            let restored = journal.load_state().await?;
            let state = marketplace.state.get_mut();
            state.book = PositionBook::restore(restored.positions, restored.nonces);
            state.allowed = restored.allowed_tokens.into_iter().collect();
            state.settings.vault = restored.vault;
            state.settings.factory = restored.factory;
            state.settings.protocol_fee_bps = restored.protocol_fee_bps.unwrap_or(0);
            info!(positions = state.book.len(), "ledger restored from journal");
            marketplace.verify_escrow().await?;
        }

        marketplace.journal = Some(journal);
        Ok(marketplace)
    }

    pub fn custody(&self) -> Address {
        self.custody
    }

    pub fn is_journaled(&self) -> bool {
        self.journal.is_some()
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Lifecycle operations
    // =========================================================================

    /// Pay `amount` of an allowed payment token and receive as many asset
    /// units at par.
    pub async fn enter_position(
        &self,
        owner: Address,
        asset: Address,
        payment_token: Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let state = self.state.lock().await;

        let factory = self
            .check_entry(&state, asset, payment_token, amount)
            .await
            .inspect_err(|e| log_rejection("enter", e))?;

        let payee = state.settings.vault.unwrap_or(self.custody);
        let mut settlement = Settlement::new(self.tokens.as_ref(), self.registry.as_ref());
        if let Err(e) = settlement.transfer(payment_token, owner, payee, amount).await {
            return Err(settlement.abort(e).await);
        }
        if let Err(e) = settlement.issue(factory, asset, owner, amount).await {
            return Err(settlement.abort(e).await);
        }

        let events = vec![LedgerEvent::PositionEntered {
            owner,
            asset,
            payment_token,
            amount,
        }];
        self.commit_changes(settlement, None, &events).await?;
        self.publish(events);

        info!(
            owner = %owner,
            asset = %asset,
            payment_token = %payment_token,
            amount = %amount,
            "position entered"
        );
        Ok(())
    }

    /// Escrow `units` of the owner's free asset balance as a new fixed-price
    /// offer. Every call creates a new position.
    pub async fn list_position_for_sale(
        &self,
        owner: Address,
        asset: Address,
        preferred_settlement_token: Address,
        units: Amount,
        price_bps: PriceBps,
    ) -> Result<PositionHandle, LedgerError> {
        let mut state = self.state.lock().await;

        let plan = self
            .check_listing(&state, owner, asset, preferred_settlement_token, units, price_bps)
            .await
            .inspect_err(|e| log_rejection("list", e))?;

        let mut settlement = Settlement::new(self.tokens.as_ref(), self.registry.as_ref());
        if let Err(e) = settlement.transfer(asset, owner, self.custody, units).await {
            return Err(settlement.abort(e).await);
        }

        let handle = plan.position.handle;
        let events = vec![LedgerEvent::ListedPositionForSale {
            owner,
            asset,
            preferred_settlement_token,
            units,
            price_bps,
            handle,
        }];
        self.commit_changes(settlement, Some(plan.change()), &events)
            .await?;
        state.book.apply_list(plan);
        self.publish(events);

        info!(
            handle = %handle,
            owner = %owner,
            asset = %asset,
            units = %units,
            price_bps,
            "position listed"
        );
        Ok(handle)
    }

    /// Buy `units` of a listed position at its fixed price.
    pub async fn buy_position(
        &self,
        buyer: Address,
        handle: PositionHandle,
        units: Amount,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;

        let quote = self
            .quote_buy(&state, &handle, units)
            .inspect_err(|e| log_rejection("buy", e))?;

        let position = &quote.plan.position;
        let token = position.preferred_settlement_token;
        let mut settlement = Settlement::new(self.tokens.as_ref(), self.registry.as_ref());
        if let Err(e) = settlement
            .transfer(token, buyer, position.owner, quote.proceeds)
            .await
        {
            return Err(settlement.abort(e).await);
        }
        if let Err(e) = settlement
            .transfer(token, buyer, quote.fee_to, quote.fee)
            .await
        {
            return Err(settlement.abort(e).await);
        }
        if let Err(e) = settlement
            .transfer(position.asset, self.custody, buyer, units)
            .await
        {
            return Err(settlement.abort(e).await);
        }

        let plan = &quote.plan;
        let mut events = vec![LedgerEvent::PositionBought {
            handle,
            buyer,
            seller: plan.position.owner,
            units,
            cost: quote.cost,
            fee: quote.fee,
            remaining_units: plan.remaining,
        }];
        if plan.closes() {
            events.push(LedgerEvent::PositionClosed {
                handle,
                owner: plan.position.owner,
            });
        }
        self.commit_changes(settlement, Some(plan.change()), &events)
            .await?;
        state.book.apply_reduce(plan);
        self.publish(events);

        info!(
            handle = %handle,
            buyer = %buyer,
            units = %units,
            cost = %quote.cost,
            fee = %quote.fee,
            remaining = %plan.remaining,
            "position bought"
        );
        Ok(())
    }

    /// Withdraw `units` of the caller's own listing back to their free balance.
    pub async fn delist_position(
        &self,
        caller: Address,
        handle: PositionHandle,
        units: Amount,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;

        let plan = state
            .book
            .plan_delist(&caller, &handle, units)
            .inspect_err(|e| log_rejection("delist", e))?;

        let position = &plan.position;
        let mut settlement = Settlement::new(self.tokens.as_ref(), self.registry.as_ref());
        if let Err(e) = settlement
            .transfer(position.asset, self.custody, position.owner, units)
            .await
        {
            return Err(settlement.abort(e).await);
        }

        let mut events = vec![LedgerEvent::PositionDelisted {
            handle,
            owner: position.owner,
            units,
            remaining_units: plan.remaining,
        }];
        if plan.closes() {
            events.push(LedgerEvent::PositionClosed {
                handle,
                owner: position.owner,
            });
        }
        self.commit_changes(settlement, Some(plan.change()), &events)
            .await?;
        state.book.apply_reduce(&plan);
        self.publish(events);

        info!(
            handle = %handle,
            owner = %caller,
            units = %units,
            remaining = %plan.remaining,
            "position delisted"
        );
        Ok(())
    }

    // =========================================================================
    // Admin operations
    // =========================================================================

    pub async fn set_allowed_token(
        &self,
        caller: Address,
        token: Address,
        allowed: bool,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.settings.ensure_authority(&caller)?;

        self.journal_admin(LedgerEvent::AllowedTokenSet { token, allowed })
            .await?;
        state.allowed.set(token, allowed);
        info!(token = %token, allowed, "allowed token updated");
        Ok(())
    }

    pub async fn set_vault_address(
        &self,
        caller: Address,
        vault: Address,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.settings.ensure_authority(&caller)?;

        self.journal_admin(LedgerEvent::VaultAddressSet { vault })
            .await?;
        state.settings.vault = Some(vault);
        info!(vault = %vault, "vault address updated");
        Ok(())
    }

    pub async fn set_factory_address(
        &self,
        caller: Address,
        factory: Address,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.settings.ensure_authority(&caller)?;

        self.journal_admin(LedgerEvent::FactoryAddressSet { factory })
            .await?;
        state.settings.factory = Some(factory);
        info!(factory = %factory, "factory address updated");
        Ok(())
    }

    pub async fn set_protocol_fee_bps(
        &self,
        caller: Address,
        fee_bps: PriceBps,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        state.settings.ensure_authority(&caller)?;
        AdminSettings::validate_fee(fee_bps)?;

        self.journal_admin(LedgerEvent::ProtocolFeeSet { fee_bps })
            .await?;
        state.settings.protocol_fee_bps = fee_bps;
        info!(fee_bps, "protocol fee updated");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Open positions of `owner`, in listing order.
    pub async fn get_user_positions(&self, owner: &Address) -> Vec<Position> {
        self.state.lock().await.book.positions_of(owner)
    }

    pub async fn position(&self, handle: &PositionHandle) -> Option<Position> {
        self.state.lock().await.book.get(handle).cloned()
    }

    /// Lookup returning `Position::EMPTY` for an unknown or closed handle.
    pub async fn position_hash_to_asset(&self, handle: &PositionHandle) -> Position {
        self.position(handle).await.unwrap_or(Position::EMPTY)
    }

    pub async fn is_allowed(&self, token: &Address) -> bool {
        self.state.lock().await.allowed.is_allowed(token)
    }

    pub async fn allowed_tokens(&self) -> Vec<Address> {
        self.state.lock().await.allowed.iter().copied().collect()
    }

    pub async fn settings(&self) -> AdminSettings {
        self.state.lock().await.settings.clone()
    }

    pub async fn next_nonce(&self, owner: &Address) -> u64 {
        self.state.lock().await.book.next_nonce(owner)
    }

    /// Metadata of `asset` from the configured asset registry.
    pub async fn asset_info(&self, asset: &Address) -> Result<Option<AssetInfo>, LedgerError> {
        let factory = self.state.lock().await.settings.factory()?;
        self.registry
            .asset_info(&factory, asset)
            .await
            .map_err(untouched)
    }

    /// Journaled events, oldest first. Empty when running without a journal.
    pub async fn event_history(
        &self,
        handle: Option<&PositionHandle>,
        limit: i64,
    ) -> Result<Vec<JournaledEvent>, LedgerError> {
        match &self.journal {
            Some(journal) => Ok(journal.query_events(handle, limit).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Check the arena and owner index agree.
    pub async fn is_consistent(&self) -> bool {
        self.state.lock().await.book.is_consistent()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn check_entry(
        &self,
        state: &LedgerState,
        asset: Address,
        payment_token: Address,
        amount: Amount,
    ) -> Result<Address, LedgerError> {
        let factory = state.settings.factory()?;
        state.allowed.ensure_allowed(&payment_token)?;
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        self.ensure_known_asset(&factory, &asset).await?;
        Ok(factory)
    }

    async fn check_listing(
        &self,
        state: &LedgerState,
        owner: Address,
        asset: Address,
        preferred_settlement_token: Address,
        units: Amount,
        price_bps: PriceBps,
    ) -> Result<ListPlan, LedgerError> {
        let plan = state
            .book
            .plan_list(owner, asset, preferred_settlement_token, units, price_bps)?;
        // Listing also requires the settlement token to be allowed, the same
        // gate entry applies to payment tokens.
        state.allowed.ensure_allowed(&preferred_settlement_token)?;
        let factory = state.settings.factory()?;
        self.ensure_known_asset(&factory, &asset).await?;

        let free = self
            .tokens
            .balance_of(&asset, &owner)
            .await
            .map_err(untouched)?;
        if free < units {
            return Err(LedgerError::InsufficientFreeBalance {
                required: units,
                available: free,
            });
        }
        Ok(plan)
    }

    fn quote_buy(
        &self,
        state: &LedgerState,
        handle: &PositionHandle,
        units: Amount,
    ) -> Result<BuyQuote, LedgerError> {
        let plan = state.book.plan_buy(handle, units)?;
        let cost = engine::cost(units, plan.position.price_bps)?;
        // Without a vault there is nowhere to route a fee, so none is withheld.
        let (fee_bps, fee_to) = match state.settings.vault {
            Some(vault) => (state.settings.protocol_fee_bps, vault),
            None => (0, self.custody),
        };
        let (proceeds, fee) = engine::split_fee(cost, fee_bps)?;
        Ok(BuyQuote {
            plan,
            cost,
            proceeds,
            fee,
            fee_to,
        })
    }

    /// Custody holds at least the listed units of every asset in the book, and
    /// each asset is known to the configured registry.
    async fn verify_escrow(&self) -> Result<(), LedgerError> {
        let state = self.state.lock().await;
        for (asset, listed) in state.book.listed_by_asset()? {
            let held = self
                .tokens
                .balance_of(&asset, &self.custody)
                .await
                .map_err(untouched)?;
            let known = match state.settings.factory {
                Some(factory) => self
                    .registry
                    .asset_info(&factory, &asset)
                    .await
                    .map_err(untouched)?
                    .is_some(),
                None => true,
            };
            if held < listed || !known {
                tracing::error!(
                    %asset,
                    %listed,
                    %held,
                    known,
                    "restored book is not backed by custody"
                );
                return Err(LedgerError::EscrowMismatch {
                    asset,
                    listed,
                    held,
                });
            }
        }
        Ok(())
    }

    async fn ensure_known_asset(
        &self,
        factory: &Address,
        asset: &Address,
    ) -> Result<(), LedgerError> {
        match self.registry.asset_info(factory, asset).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(LedgerError::UnknownAsset(*asset)),
            Err(e) => Err(untouched(e)),
        }
    }

    /// Persist the changeset, reversing the call's movements if that fails.
    async fn commit_changes(
        &self,
        settlement: Settlement<'_>,
        book: Option<engine::BookChange>,
        events: &[LedgerEvent],
    ) -> Result<(), LedgerError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let changeset = Changeset {
            book,
            events: events.to_vec(),
        };
        match journal.commit(&changeset).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "journal commit failed, reversing movements");
                Err(settlement.abort_after_journal(e).await)
            }
        }
    }

    async fn journal_admin(&self, event: LedgerEvent) -> Result<(), LedgerError> {
        if let Some(journal) = &self.journal {
            journal
                .commit(&Changeset {
                    book: None,
                    events: vec![event.clone()],
                })
                .await?;
        }
        self.publish(vec![event]);
        Ok(())
    }

    fn publish(&self, events: Vec<LedgerEvent>) {
        for event in events {
            // No subscribers is not an error.
            let _ = self.events.send(event);
        }
    }
}

/// A collaborator failed before anything moved.
fn untouched(source: TransferError) -> LedgerError {
    LedgerError::TransferFailed {
        source,
        compensated: true,
    }
}

fn log_rejection(operation: &'static str, err: &LedgerError) {
    debug!(operation, error = %err, "operation rejected");
}
