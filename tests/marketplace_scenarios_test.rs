use stakeledger::domain::{Address, Amount, LedgerEvent, Position, PositionHandle};
use stakeledger::token::TokenTransfer;
use stakeledger::{InMemoryAssetFactory, InMemoryTokens, LedgerError, Marketplace, MarketplaceParams};
use std::sync::Arc;

const ADMIN: Address = Address::from_bytes([0xad; 20]);
const CUSTODY: Address = Address::from_bytes([0xcc; 20]);
const FACTORY: Address = Address::from_bytes([0xf0; 20]);
const USD: Address = Address::from_bytes([0xee; 20]);
const VAULT: Address = Address::from_bytes([0x5a; 20]);
const SELLER: Address = Address::from_bytes([0x11; 20]);
const BUYER: Address = Address::from_bytes([0x22; 20]);

fn tokens(s: &str) -> Amount {
    Amount::from_token_str(s).unwrap()
}

struct Fixture {
    market: Arc<Marketplace>,
    tokens: InMemoryTokens,
    asset: Address,
}

impl Fixture {
    async fn new(vault: Option<Address>, fee_bps: u32) -> Self {
        let tokens = InMemoryTokens::new();
        let factory = InMemoryAssetFactory::new(FACTORY, tokens.clone());
        let asset = factory
            .create_asset(&ADMIN, "HomeAsset123", "MDAO", "https://mdao.com", Amount::ZERO)
            .await
            .unwrap();

        let mut params = MarketplaceParams::new(ADMIN, CUSTODY);
        params.factory = Some(FACTORY);
        params.vault = vault;
        params.protocol_fee_bps = fee_bps;
        params.allowed_tokens = vec![USD];
        let market =
            Marketplace::new(params, Arc::new(tokens.clone()), Arc::new(factory)).unwrap();

        Self {
            market: Arc::new(market),
            tokens,
            asset,
        }
    }

    async fn balance(&self, token: &Address, holder: &Address) -> Amount {
        self.tokens.balance_of(token, holder).await.unwrap()
    }

    /// Seller enters 20 units and lists 5 at 150%; buyer holds 200 USD.
    async fn listed(&self) -> PositionHandle {
        self.tokens.mint(&USD, &SELLER, tokens("20")).await.unwrap();
        self.tokens.mint(&USD, &BUYER, tokens("200")).await.unwrap();
        self.market
            .enter_position(SELLER, self.asset, USD, tokens("20"))
            .await
            .unwrap();
        self.market
            .list_position_for_sale(SELLER, self.asset, USD, tokens("5"), 15_000)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_enter_list_buy_settles_at_fixed_price() {
    let fx = Fixture::new(None, 0).await;
    let handle = fx.listed().await;

    assert_eq!(handle, PositionHandle::derive(&SELLER, &fx.asset, 0));
    assert_eq!(fx.balance(&fx.asset, &SELLER).await, tokens("15"));
    assert_eq!(fx.balance(&fx.asset, &CUSTODY).await, tokens("5"));

    fx.market
        .buy_position(BUYER, handle, tokens("5"))
        .await
        .unwrap();

    assert_eq!(fx.balance(&fx.asset, &BUYER).await, tokens("5"));
    assert_eq!(fx.balance(&USD, &BUYER).await, tokens("192.5"));
    assert_eq!(fx.balance(&USD, &SELLER).await, tokens("7.5"));
    assert_eq!(fx.balance(&fx.asset, &CUSTODY).await, Amount::ZERO);

    // Fully bought positions are removed.
    assert_eq!(fx.market.position_hash_to_asset(&handle).await, Position::EMPTY);
    assert!(fx.market.get_user_positions(&SELLER).await.is_empty());
    assert!(fx.market.is_consistent().await);
}

#[tokio::test]
async fn test_partial_delist_keeps_remainder_listed() {
    let fx = Fixture::new(None, 0).await;
    let handle = fx.listed().await;

    fx.market
        .delist_position(SELLER, handle, tokens("2"))
        .await
        .unwrap();

    let position = fx.market.position_hash_to_asset(&handle).await;
    assert_eq!(position.units, tokens("3"));
    assert_eq!(position.price_bps, 15_000);
    assert_eq!(fx.balance(&fx.asset, &SELLER).await, tokens("17"));
    assert_eq!(fx.market.get_user_positions(&SELLER).await, vec![position]);
}

#[tokio::test]
async fn test_full_delist_removes_record() {
    let fx = Fixture::new(None, 0).await;
    let handle = fx.listed().await;
    let mut rx = fx.market.subscribe();

    fx.market
        .delist_position(SELLER, handle, tokens("5"))
        .await
        .unwrap();

    assert_eq!(fx.market.position_hash_to_asset(&handle).await, Position::EMPTY);
    assert!(fx.market.get_user_positions(&SELLER).await.is_empty());
    assert_eq!(fx.balance(&fx.asset, &SELLER).await, tokens("20"));

    assert!(matches!(
        rx.recv().await.unwrap(),
        LedgerEvent::PositionDelisted { .. }
    ));
    assert_eq!(
        rx.recv().await.unwrap(),
        LedgerEvent::PositionClosed {
            handle,
            owner: SELLER
        }
    );
}

#[tokio::test]
async fn test_delist_by_non_owner_is_unauthorized() {
    let fx = Fixture::new(None, 0).await;
    let handle = fx.listed().await;

    let err = fx
        .market
        .delist_position(BUYER, handle, tokens("1"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized { caller } if caller == BUYER));
    assert_eq!(fx.market.position(&handle).await.unwrap().units, tokens("5"));
}

#[tokio::test]
async fn test_oversized_requests_are_rejected_without_effect() {
    let fx = Fixture::new(None, 0).await;
    let handle = fx.listed().await;
    let transfers = fx.tokens.transfer_count().await;

    assert!(matches!(
        fx.market.buy_position(BUYER, handle, tokens("6")).await,
        Err(LedgerError::InsufficientUnitsAvailable { .. })
    ));
    assert!(matches!(
        fx.market.delist_position(SELLER, handle, tokens("6")).await,
        Err(LedgerError::InsufficientUnitsListed { .. })
    ));
    assert!(matches!(
        fx.market.buy_position(BUYER, handle, Amount::ZERO).await,
        Err(LedgerError::ZeroAmount)
    ));
    let unknown = PositionHandle::derive(&SELLER, &fx.asset, 9);
    assert!(matches!(
        fx.market.buy_position(BUYER, unknown, tokens("1")).await,
        Err(LedgerError::PositionNotFound(h)) if h == unknown
    ));

    assert_eq!(fx.tokens.transfer_count().await, transfers);
    assert_eq!(fx.market.position(&handle).await.unwrap().units, tokens("5"));
}

#[tokio::test]
async fn test_repeated_listings_get_distinct_handles() {
    let fx = Fixture::new(None, 0).await;
    let first = fx.listed().await;
    let second = fx
        .market
        .list_position_for_sale(SELLER, fx.asset, USD, tokens("5"), 15_000)
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(second, PositionHandle::derive(&SELLER, &fx.asset, 1));
    let positions = fx.market.get_user_positions(&SELLER).await;
    assert_eq!(
        positions.iter().map(|p| p.handle).collect::<Vec<_>>(),
        vec![first, second]
    );

    // Closing a position never frees its nonce.
    fx.market
        .delist_position(SELLER, first, tokens("5"))
        .await
        .unwrap();
    assert_eq!(fx.market.next_nonce(&SELLER).await, 2);
}

#[tokio::test]
async fn test_fee_is_routed_to_vault() {
    let fx = Fixture::new(Some(VAULT), 250).await;
    let handle = fx.listed().await;
    // With a vault configured the entry payment lands there.
    assert_eq!(fx.balance(&USD, &VAULT).await, tokens("20"));

    fx.market
        .buy_position(BUYER, handle, tokens("4"))
        .await
        .unwrap();

    // cost 6, fee 2.5% of 6 = 0.15
    assert_eq!(fx.balance(&USD, &BUYER).await, tokens("194"));
    assert_eq!(fx.balance(&USD, &SELLER).await, tokens("5.85"));
    assert_eq!(fx.balance(&USD, &VAULT).await, tokens("20.15"));
    assert_eq!(fx.market.position(&handle).await.unwrap().units, tokens("1"));
}

#[tokio::test]
async fn test_failed_transfer_is_compensated() {
    let fx = Fixture::new(None, 0).await;
    let handle = fx.listed().await;

    // Proceeds move, then the asset leg out of custody fails.
    fx.tokens.fail_token(fx.asset).await;
    let err = fx
        .market
        .buy_position(BUYER, handle, tokens("5"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::TransferFailed {
            compensated: true,
            ..
        }
    ));
    assert!(!err.is_rejection());

    assert_eq!(fx.balance(&USD, &BUYER).await, tokens("200"));
    assert_eq!(fx.balance(&USD, &SELLER).await, Amount::ZERO);
    assert_eq!(fx.market.position(&handle).await.unwrap().units, tokens("5"));

    fx.tokens.heal_token(&fx.asset).await;
    fx.market
        .buy_position(BUYER, handle, tokens("5"))
        .await
        .unwrap();
    assert_eq!(fx.balance(&USD, &SELLER).await, tokens("7.5"));
}

#[tokio::test]
async fn test_buyer_without_funds_changes_nothing() {
    let fx = Fixture::new(None, 0).await;
    let handle = fx.listed().await;
    let poor = Address::from_bytes([0x33; 20]);

    let err = fx
        .market
        .buy_position(poor, handle, tokens("1"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::TransferFailed { .. }));
    assert_eq!(fx.market.position(&handle).await.unwrap().units, tokens("5"));
    assert_eq!(fx.balance(&fx.asset, &CUSTODY).await, tokens("5"));
}

#[tokio::test]
async fn test_failed_entry_leaves_no_units() {
    let fx = Fixture::new(None, 0).await;
    fx.tokens.mint(&USD, &SELLER, tokens("20")).await.unwrap();
    fx.tokens.fail_token(USD).await;

    let err = fx
        .market
        .enter_position(SELLER, fx.asset, USD, tokens("20"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::TransferFailed { .. }));
    assert_eq!(fx.balance(&fx.asset, &SELLER).await, Amount::ZERO);
    assert_eq!(fx.tokens.total_supply(&fx.asset).await, Amount::ZERO);
}

#[tokio::test]
async fn test_concurrent_buys_never_oversell() {
    let fx = Fixture::new(None, 0).await;
    let handle = fx.listed().await;

    let buyers: Vec<Address> = (0..8u8).map(|i| Address::from_bytes([0x40 + i; 20])).collect();
    for buyer in &buyers {
        fx.tokens.mint(&USD, buyer, tokens("10")).await.unwrap();
    }

    let results = futures::future::join_all(buyers.iter().map(|buyer| {
        let market = fx.market.clone();
        let buyer = *buyer;
        async move { market.buy_position(buyer, handle, tokens("2")).await }
    }))
    .await;

    let filled = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(filled, 2);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err, LedgerError::InsufficientUnitsAvailable { .. }));
    }
    assert_eq!(fx.market.position(&handle).await.unwrap().units, tokens("1"));
    assert_eq!(fx.balance(&fx.asset, &CUSTODY).await, tokens("1"));
    assert!(fx.market.is_consistent().await);
}

#[tokio::test]
async fn test_listing_more_than_free_balance_is_rejected() {
    let fx = Fixture::new(None, 0).await;
    fx.listed().await;

    // 15 free units remain after escrowing 5.
    let err = fx
        .market
        .list_position_for_sale(SELLER, fx.asset, USD, tokens("16"), 10_000)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFreeBalance { .. }));
    assert_eq!(fx.market.next_nonce(&SELLER).await, 1);
}

#[tokio::test]
async fn test_disallowed_settlement_token_cannot_be_listed() {
    let fx = Fixture::new(None, 0).await;
    fx.listed().await;
    let other = Address::from_bytes([0x77; 20]);

    tokio_test::assert_err!(
        fx.market
            .list_position_for_sale(SELLER, fx.asset, other, tokens("1"), 10_000)
            .await
    );
    fx.market.set_allowed_token(ADMIN, other, true).await.unwrap();
    tokio_test::assert_ok!(
        fx.market
            .list_position_for_sale(SELLER, fx.asset, other, tokens("1"), 10_000)
            .await
    );
}
