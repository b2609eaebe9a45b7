use crate::api::{caller, parse_address, AppState};
use crate::domain::PriceBps;
use crate::error::AppError;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedTokenRequest {
    pub token: String,
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRequest {
    pub fee_bps: PriceBps,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub authority: String,
    pub custody: String,
    pub vault: Option<String>,
    pub factory: Option<String>,
    pub protocol_fee_bps: PriceBps,
    pub allowed_tokens: Vec<String>,
}

fn ok() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    let marketplace = &state.marketplace;
    let settings = marketplace.settings().await;
    let allowed_tokens = marketplace.allowed_tokens().await;

    Json(SettingsResponse {
        authority: settings.authority.to_string(),
        custody: marketplace.custody().to_string(),
        vault: settings.vault.map(|a| a.to_string()),
        factory: settings.factory.map(|a| a.to_string()),
        protocol_fee_bps: settings.protocol_fee_bps,
        allowed_tokens: allowed_tokens.iter().map(|a| a.to_string()).collect(),
    })
}

pub async fn set_allowed_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AllowedTokenRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let caller = caller(&headers)?;
    let token = parse_address("token", &body.token)?;
    state
        .marketplace
        .set_allowed_token(caller, token, body.allowed)
        .await?;
    Ok(ok())
}

pub async fn set_vault(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AddressRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let caller = caller(&headers)?;
    let vault = parse_address("address", &body.address)?;
    state.marketplace.set_vault_address(caller, vault).await?;
    Ok(ok())
}

pub async fn set_factory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AddressRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let caller = caller(&headers)?;
    let factory = parse_address("address", &body.address)?;
    state
        .marketplace
        .set_factory_address(caller, factory)
        .await?;
    Ok(ok())
}

pub async fn set_fee(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<FeeRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let caller = caller(&headers)?;
    state
        .marketplace
        .set_protocol_fee_bps(caller, body.fee_bps)
        .await?;
    Ok(ok())
}
