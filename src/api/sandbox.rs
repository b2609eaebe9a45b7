//! Routes that drive the in-process token sheet and asset factory.
//!
//! They exist only when the node runs against `InMemoryTokens` and
//! `InMemoryAssetFactory`; without a sandbox every route answers 404.

use crate::api::{caller, parse_address, parse_amount, AppState};
use crate::error::AppError;
use crate::token::{InMemoryAssetFactory, InMemoryTokens, TransferError};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

/// Handles onto the in-process collaborators the marketplace was built with.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub tokens: InMemoryTokens,
    pub factory: InMemoryAssetFactory,
}

impl Sandbox {
    pub fn new(tokens: InMemoryTokens, factory: InMemoryAssetFactory) -> Self {
        Self { tokens, factory }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    pub token: String,
    pub to: String,
    pub amount: String,
}

pub(crate) fn sandbox(state: &AppState) -> Result<&Sandbox, AppError> {
    state
        .sandbox
        .as_ref()
        .ok_or_else(|| AppError::NotFound("sandbox collaborators are not enabled".to_string()))
}

pub(crate) fn sandbox_error(err: TransferError) -> AppError {
    match err {
        TransferError::UnknownAsset { asset, .. } => AppError::NotFound(format!("asset {}", asset)),
        other => AppError::BadRequest(other.to_string()),
    }
}

/// Credit freshly minted units of any token. Authority only.
pub async fn mint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MintRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sandbox = sandbox(&state)?;
    let caller = caller(&headers)?;
    state.marketplace.settings().await.ensure_authority(&caller)?;

    let token = parse_address("token", &req.token)?;
    let to = parse_address("to", &req.to)?;
    let amount = parse_amount("amount", &req.amount)?;
    if amount.is_zero() {
        return Err(AppError::BadRequest("amount must be greater than zero".to_string()));
    }

    sandbox
        .tokens
        .mint(&token, &to, amount)
        .await
        .map_err(sandbox_error)?;
    tracing::info!(%token, %to, %amount, "sandbox mint");

    Ok(Json(serde_json::json!({
        "token": token.to_string(),
        "to": to.to_string(),
        "amount": amount.to_token_string(),
    })))
}
