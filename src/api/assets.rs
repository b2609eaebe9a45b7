use crate::api::sandbox::{sandbox, sandbox_error};
use crate::api::{caller, parse_address, parse_amount, AppState};
use crate::domain::Amount;
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetResponse {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub url: String,
    pub issued_units: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssetRequest {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub initial_units: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssetUrlRequest {
    pub url: String,
}

pub async fn get_asset(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AssetResponse>, AppError> {
    let asset = parse_address("asset address", &address)?;
    let info = state
        .marketplace
        .asset_info(&asset)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("asset {}", asset)))?;

    Ok(Json(AssetResponse {
        address: info.address.to_string(),
        name: info.name,
        symbol: info.symbol,
        url: info.url,
        issued_units: info.issued_units.to_token_string(),
    }))
}

/// Register an asset class with the sandbox factory. The caller receives the
/// initial units.
pub async fn create_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateAssetRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sandbox = sandbox(&state)?;
    let creator = caller(&headers)?;
    if req.symbol.trim().is_empty() {
        return Err(AppError::BadRequest("symbol must not be empty".to_string()));
    }
    let initial_units = match &req.initial_units {
        Some(units) => parse_amount("initialUnits", units)?,
        None => Amount::ZERO,
    };

    let address = sandbox
        .factory
        .create_asset(&creator, &req.name, &req.symbol, &req.url, initial_units)
        .await
        .map_err(sandbox_error)?;

    Ok(Json(serde_json::json!({
        "address": address.to_string(),
        "factory": sandbox.factory.address().to_string(),
    })))
}

/// Replace the metadata URL of a sandbox asset. Authority only.
pub async fn update_asset_url(
    Path(address): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AssetUrlRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sandbox = sandbox(&state)?;
    let caller = caller(&headers)?;
    state.marketplace.settings().await.ensure_authority(&caller)?;
    let asset = parse_address("asset address", &address)?;

    sandbox
        .factory
        .update_asset_url(&asset, &req.url)
        .await
        .map_err(sandbox_error)?;

    Ok(Json(serde_json::json!({
        "address": asset.to_string(),
        "url": req.url,
    })))
}
