use axum::http::StatusCode;
use stakeledger::api;
use stakeledger::api::sandbox::Sandbox;
use stakeledger::domain::{Address, Amount};
use stakeledger::{
    InMemoryAssetFactory, InMemoryTokens, Marketplace, MarketplaceParams, TokenTransfer,
};
use std::sync::Arc;
use tower::util::ServiceExt;

const ADMIN: &str = "0xadadadadadadadadadadadadadadadadadadadad";
const CUSTODY: &str = "0xcccccccccccccccccccccccccccccccccccccccc";
const FACTORY: &str = "0xf0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0";
const USD: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";
const SELLER: &str = "0x1111111111111111111111111111111111111111";
const BUYER: &str = "0x2222222222222222222222222222222222222222";

struct TestApp {
    app: axum::Router,
    tokens: InMemoryTokens,
    asset: Address,
}

fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

async fn setup_test_app() -> TestApp {
    let tokens = InMemoryTokens::new();
    let factory = InMemoryAssetFactory::new(addr(FACTORY), tokens.clone());
    let asset = factory
        .create_asset(&addr(ADMIN), "HomeAsset123", "MDAO", "https://mdao.com", Amount::ZERO)
        .await
        .unwrap();

    let mut params = MarketplaceParams::new(addr(ADMIN), addr(CUSTODY));
    params.factory = Some(addr(FACTORY));
    params.allowed_tokens = vec![addr(USD)];
    let marketplace =
        Marketplace::new(params, Arc::new(tokens.clone()), Arc::new(factory.clone())).unwrap();
    let state = api::AppState::new(Arc::new(marketplace))
        .with_sandbox(Sandbox::new(tokens.clone(), factory));

    TestApp {
        app: api::create_router(state),
        tokens,
        asset,
    }
}

async fn request(
    app: axum::Router,
    method: &str,
    uri: &str,
    caller: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = axum::http::Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder.header(api::CALLER_HEADER, caller);
    }
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };

    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Enter 20 units as the seller and list 5 of them at 150%.
async fn enter_and_list(test_app: &TestApp) -> String {
    let asset = test_app.asset.to_string();
    test_app
        .tokens
        .mint(&addr(USD), &addr(SELLER), Amount::from_tokens(20))
        .await
        .unwrap();

    let (status, _) = request(
        test_app.app.clone(),
        "POST",
        "/v1/positions/enter",
        Some(SELLER),
        Some(serde_json::json!({"asset": asset, "paymentToken": USD, "amount": "20"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = request(
        test_app.app.clone(),
        "POST",
        "/v1/positions/list",
        Some(SELLER),
        Some(serde_json::json!({
            "asset": asset,
            "settlementToken": USD,
            "units": "5",
            "priceBps": 15000
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    json["handle"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoints() {
    let test_app = setup_test_app().await;
    let (status, json) = request(test_app.app.clone(), "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");

    let (status, json) = request(test_app.app, "GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ready");
    assert_eq!(json["journaled"], false);
}

#[tokio::test]
async fn test_list_then_read_position() {
    let test_app = setup_test_app().await;
    let handle = enter_and_list(&test_app).await;

    let (status, json) = request(
        test_app.app.clone(),
        "GET",
        &format!("/v1/positions/{}", handle),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["handle"], handle);
    assert_eq!(json["owner"], SELLER);
    assert_eq!(json["preferredSettlementToken"], USD);
    assert_eq!(json["units"], "5");
    assert_eq!(json["priceBps"], 15000);
    assert_eq!(json["nonce"], 0);

    let (status, json) = request(
        test_app.app,
        "GET",
        &format!("/v1/positions?owner={}", SELLER),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["positions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_buy_all_then_lookup_returns_sentinel() {
    let test_app = setup_test_app().await;
    let handle = enter_and_list(&test_app).await;
    test_app
        .tokens
        .mint(&addr(USD), &addr(BUYER), Amount::from_tokens(200))
        .await
        .unwrap();

    let (status, _) = request(
        test_app.app.clone(),
        "POST",
        &format!("/v1/positions/{}/buy", handle),
        Some(BUYER),
        Some(serde_json::json!({"units": "5"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = request(
        test_app.app,
        "GET",
        &format!("/v1/positions/{}", handle),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["units"], "0");
    assert_eq!(json["priceBps"], 0);
    assert_eq!(json["owner"], format!("0x{}", "0".repeat(40)));
}

#[tokio::test]
async fn test_buy_too_many_units_conflicts() {
    let test_app = setup_test_app().await;
    let handle = enter_and_list(&test_app).await;

    let (status, json) = request(
        test_app.app,
        "POST",
        &format!("/v1/positions/{}/buy", handle),
        Some(BUYER),
        Some(serde_json::json!({"units": "6"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "InsufficientUnitsAvailable");
    assert_eq!(json["rejected"], true);
}

#[tokio::test]
async fn test_delist_by_other_caller_forbidden() {
    let test_app = setup_test_app().await;
    let handle = enter_and_list(&test_app).await;

    let (status, json) = request(
        test_app.app,
        "POST",
        &format!("/v1/positions/{}/delist", handle),
        Some(BUYER),
        Some(serde_json::json!({"units": "1"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["kind"], "Unauthorized");
}

#[tokio::test]
async fn test_missing_caller_header_is_bad_request() {
    let test_app = setup_test_app().await;
    let (status, json) = request(
        test_app.app,
        "POST",
        "/v1/positions/enter",
        None,
        Some(serde_json::json!({"asset": USD, "paymentToken": USD, "amount": "1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "BadRequest");
}

#[tokio::test]
async fn test_unknown_position_on_buy_is_not_found() {
    let test_app = setup_test_app().await;
    let (status, json) = request(
        test_app.app,
        "POST",
        &format!("/v1/positions/0x{}/buy", "ab".repeat(32)),
        Some(BUYER),
        Some(serde_json::json!({"units": "1"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "PositionNotFound");
}

#[tokio::test]
async fn test_admin_routes_require_authority() {
    let test_app = setup_test_app().await;
    let vault = "0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a";

    let (status, _) = request(
        test_app.app.clone(),
        "PUT",
        "/v1/admin/vault",
        Some(SELLER),
        Some(serde_json::json!({"address": vault})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        test_app.app.clone(),
        "PUT",
        "/v1/admin/vault",
        Some(ADMIN),
        Some(serde_json::json!({"address": vault})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        test_app.app.clone(),
        "PUT",
        "/v1/admin/fee",
        Some(ADMIN),
        Some(serde_json::json!({"feeBps": 250})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        test_app.app.clone(),
        "PUT",
        "/v1/admin/allowed-tokens",
        Some(ADMIN),
        Some(serde_json::json!({"token": USD, "allowed": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = request(test_app.app, "GET", "/v1/admin/settings", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["vault"], vault);
    assert_eq!(json["protocolFeeBps"], 250);
    assert_eq!(json["allowedTokens"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_asset_lookup() {
    let test_app = setup_test_app().await;
    let (status, json) = request(
        test_app.app.clone(),
        "GET",
        &format!("/v1/assets/{}", test_app.asset),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["symbol"], "MDAO");
    assert_eq!(json["url"], "https://mdao.com");

    let (status, _) = request(
        test_app.app,
        "GET",
        &format!("/v1/assets/{}", USD),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_too_precise_amount_is_bad_request() {
    let test_app = setup_test_app().await;
    let (status, _) = request(
        test_app.app,
        "POST",
        "/v1/positions/enter",
        Some(SELLER),
        Some(serde_json::json!({
            "asset": USD,
            "paymentToken": USD,
            "amount": "0.0000000000000000001"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trade_driven_entirely_over_http() {
    let test_app = setup_test_app().await;
    let app = test_app.app;

    let (status, json) = request(
        app.clone(),
        "POST",
        "/v1/assets",
        Some(SELLER),
        Some(serde_json::json!({
            "name": "Harbor Loft",
            "symbol": "LOFT",
            "url": "https://loft.example",
            "initialUnits": "10"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["factory"], FACTORY);
    let asset = json["address"].as_str().unwrap().to_string();

    let (status, json) = request(
        app.clone(),
        "POST",
        "/v1/sandbox/mint",
        Some(ADMIN),
        Some(serde_json::json!({"token": USD, "to": BUYER, "amount": "100"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["amount"], "100");

    let (status, json) = request(
        app.clone(),
        "POST",
        "/v1/positions/list",
        Some(SELLER),
        Some(serde_json::json!({
            "asset": asset,
            "settlementToken": USD,
            "units": "4",
            "priceBps": 12500
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let handle = json["handle"].as_str().unwrap().to_string();

    let (status, _) = request(
        app.clone(),
        "POST",
        &format!("/v1/positions/{}/buy", handle),
        Some(BUYER),
        Some(serde_json::json!({"units": "4"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        test_app
            .tokens
            .balance_of(&addr(USD), &addr(SELLER))
            .await
            .unwrap(),
        Amount::from_tokens(5)
    );
    assert_eq!(
        test_app
            .tokens
            .balance_of(&addr(&asset), &addr(BUYER))
            .await
            .unwrap(),
        Amount::from_tokens(4)
    );
}

#[tokio::test]
async fn test_asset_url_update_requires_authority() {
    let test_app = setup_test_app().await;
    let uri = format!("/v1/assets/{}/url", test_app.asset);

    let (status, _) = request(
        test_app.app.clone(),
        "PUT",
        &uri,
        Some(SELLER),
        Some(serde_json::json!({"url": "https://elsewhere.example"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        test_app.app.clone(),
        "PUT",
        &uri,
        Some(ADMIN),
        Some(serde_json::json!({"url": "https://mdao.com/v2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = request(
        test_app.app.clone(),
        "GET",
        &format!("/v1/assets/{}", test_app.asset),
        None,
        None,
    )
    .await;
    assert_eq!(json["url"], "https://mdao.com/v2");

    let (status, _) = request(
        test_app.app,
        "PUT",
        &format!("/v1/assets/{}/url", USD),
        Some(ADMIN),
        Some(serde_json::json!({"url": "https://nowhere.example"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mint_requires_authority() {
    let test_app = setup_test_app().await;
    let (status, json) = request(
        test_app.app,
        "POST",
        "/v1/sandbox/mint",
        Some(BUYER),
        Some(serde_json::json!({"token": USD, "to": BUYER, "amount": "100"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["kind"], "Unauthorized");
    assert_eq!(
        test_app
            .tokens
            .balance_of(&addr(USD), &addr(BUYER))
            .await
            .unwrap(),
        Amount::ZERO
    );
}

#[tokio::test]
async fn test_sandbox_routes_absent_without_sandbox() {
    let tokens = InMemoryTokens::new();
    let factory = InMemoryAssetFactory::new(addr(FACTORY), tokens.clone());
    let marketplace = Marketplace::new(
        MarketplaceParams::new(addr(ADMIN), addr(CUSTODY)),
        Arc::new(tokens),
        Arc::new(factory),
    )
    .unwrap();
    let app = api::create_router(api::AppState::new(Arc::new(marketplace)));

    let (status, _) = request(
        app.clone(),
        "POST",
        "/v1/assets",
        Some(SELLER),
        Some(serde_json::json!({"name": "A", "symbol": "A"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(
        app,
        "POST",
        "/v1/sandbox/mint",
        Some(ADMIN),
        Some(serde_json::json!({"token": USD, "to": BUYER, "amount": "1"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
