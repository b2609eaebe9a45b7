use crate::api::AppState;
use crate::domain::{Address, LedgerEvent, PositionHandle, PriceBps};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub handle: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub events: Vec<EventDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDto {
    pub seq: i64,
    pub recorded_at_ms: i64,
    pub event: EventBody,
}

/// A ledger event as served over HTTP. Quantities are token strings, the
/// same unit the position routes use.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventBody {
    #[serde(rename_all = "camelCase")]
    PositionEntered {
        owner: Address,
        asset: Address,
        payment_token: Address,
        amount: String,
    },
    #[serde(rename_all = "camelCase")]
    ListedPositionForSale {
        owner: Address,
        asset: Address,
        preferred_settlement_token: Address,
        units: String,
        price_bps: PriceBps,
        handle: PositionHandle,
    },
    #[serde(rename_all = "camelCase")]
    PositionBought {
        handle: PositionHandle,
        buyer: Address,
        seller: Address,
        units: String,
        cost: String,
        fee: String,
        remaining_units: String,
    },
    #[serde(rename_all = "camelCase")]
    PositionDelisted {
        handle: PositionHandle,
        owner: Address,
        units: String,
        remaining_units: String,
    },
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

impl From<&LedgerEvent> for EventBody {
    fn from(event: &LedgerEvent) -> Self {
        match event.clone() {
            LedgerEvent::PositionEntered {
                owner,
                asset,
                payment_token,
                amount,
            } => EventBody::PositionEntered {
                owner,
                asset,
                payment_token,
                amount: amount.to_token_string(),
            },
            LedgerEvent::ListedPositionForSale {
                owner,
                asset,
                preferred_settlement_token,
                units,
                price_bps,
                handle,
            } => EventBody::ListedPositionForSale {
                owner,
                asset,
                preferred_settlement_token,
                units: units.to_token_string(),
                price_bps,
                handle,
            },
            LedgerEvent::PositionBought {
                handle,
                buyer,
                seller,
                units,
                cost,
                fee,
                remaining_units,
            } => EventBody::PositionBought {
                handle,
                buyer,
                seller,
                units: units.to_token_string(),
                cost: cost.to_token_string(),
                fee: fee.to_token_string(),
                remaining_units: remaining_units.to_token_string(),
            },
            LedgerEvent::PositionDelisted {
                handle,
                owner,
                units,
                remaining_units,
            } => EventBody::PositionDelisted {
                handle,
                owner,
                units: units.to_token_string(),
                remaining_units: remaining_units.to_token_string(),
            },
            LedgerEvent::PositionClosed { handle, owner } => {
                EventBody::PositionClosed { handle, owner }
            }
            LedgerEvent::AllowedTokenSet { token, allowed } => {
                EventBody::AllowedTokenSet { token, allowed }
            }
            LedgerEvent::VaultAddressSet { vault } => EventBody::VaultAddressSet { vault },
            LedgerEvent::FactoryAddressSet { factory } => {
                EventBody::FactoryAddressSet { factory }
            }
            LedgerEvent::ProtocolFeeSet { fee_bps } => EventBody::ProtocolFeeSet { fee_bps },
        }
    }
}

/// Journaled ledger history, oldest first.
pub async fn get_events(
    Query(params): Query<EventsQuery>,
    State(state): State<AppState>,
) -> Result<Json<EventsResponse>, AppError> {
    let handle = match params.handle.as_deref() {
        Some(h) => Some(
            PositionHandle::from_str(h)
                .map_err(|_| AppError::BadRequest("Invalid position handle".into()))?,
        ),
        None => None,
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }

    let events = state
        .marketplace
        .event_history(handle.as_ref(), limit)
        .await?;

    Ok(Json(EventsResponse {
        events: events
            .into_iter()
            .map(|e| EventDto {
                seq: e.seq,
                recorded_at_ms: e.recorded_at.as_ms(),
                event: EventBody::from(&e.event),
            })
            .collect(),
    }))
}
