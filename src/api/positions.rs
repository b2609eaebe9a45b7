use crate::api::{caller, parse_address, parse_amount, AppState};
use crate::domain::{Position, PositionHandle, PriceBps};
use crate::error::AppError;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterRequest {
    pub asset: String,
    pub payment_token: String,
    pub amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    pub asset: String,
    pub settlement_token: String,
    pub units: String,
    pub price_bps: PriceBps,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub handle: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitsRequest {
    pub units: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsQuery {
    pub owner: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsResponse {
    pub positions: Vec<PositionDto>,
}

/// Position record with units rendered as a token string.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDto {
    pub handle: String,
    pub asset: String,
    pub preferred_settlement_token: String,
    pub owner: String,
    pub units: String,
    pub price_bps: PriceBps,
    pub nonce: u64,
}

impl From<&Position> for PositionDto {
    fn from(position: &Position) -> Self {
        Self {
            handle: position.handle.to_string(),
            asset: position.asset.to_string(),
            preferred_settlement_token: position.preferred_settlement_token.to_string(),
            owner: position.owner.to_string(),
            units: position.units.to_token_string(),
            price_bps: position.price_bps,
            nonce: position.nonce,
        }
    }
}

fn ok() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

fn parse_handle(value: &str) -> Result<PositionHandle, AppError> {
    PositionHandle::from_str(value)
        .map_err(|_| AppError::BadRequest("Invalid position handle".into()))
}

pub async fn enter_position(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EnterRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let owner = caller(&headers)?;
    let asset = parse_address("asset", &body.asset)?;
    let payment_token = parse_address("paymentToken", &body.payment_token)?;
    let amount = parse_amount("amount", &body.amount)?;

    state
        .marketplace
        .enter_position(owner, asset, payment_token, amount)
        .await?;
    Ok(ok())
}

pub async fn list_position(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ListRequest>,
) -> Result<Json<ListResponse>, AppError> {
    let owner = caller(&headers)?;
    let asset = parse_address("asset", &body.asset)?;
    let settlement_token = parse_address("settlementToken", &body.settlement_token)?;
    let units = parse_amount("units", &body.units)?;

    let handle = state
        .marketplace
        .list_position_for_sale(owner, asset, settlement_token, units, body.price_bps)
        .await?;
    Ok(Json(ListResponse {
        handle: handle.to_string(),
    }))
}

pub async fn buy_position(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UnitsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let buyer = caller(&headers)?;
    let handle = parse_handle(&handle)?;
    let units = parse_amount("units", &body.units)?;

    state.marketplace.buy_position(buyer, handle, units).await?;
    Ok(ok())
}

pub async fn delist_position(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UnitsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let owner = caller(&headers)?;
    let handle = parse_handle(&handle)?;
    let units = parse_amount("units", &body.units)?;

    state
        .marketplace
        .delist_position(owner, handle, units)
        .await?;
    Ok(ok())
}

pub async fn get_user_positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<PositionsResponse>, AppError> {
    let owner = parse_address("owner", &params.owner)?;
    let positions = state.marketplace.get_user_positions(&owner).await;
    Ok(Json(PositionsResponse {
        positions: positions.iter().map(PositionDto::from).collect(),
    }))
}

/// Unknown and closed handles answer with the all-zero record, not 404.
pub async fn get_position(
    Path(handle): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PositionDto>, AppError> {
    let handle = parse_handle(&handle)?;
    let position = state.marketplace.position_hash_to_asset(&handle).await;
    Ok(Json(PositionDto::from(&position)))
}
