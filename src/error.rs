use crate::domain::{Address, Amount, PositionHandle, PriceBps};
use crate::token::TransferError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure of a ledger operation.
///
/// Every variant except `TransferFailed`, `Storage` and `EscrowMismatch` is a
/// rejection raised before any token moved or any record changed.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("payment token {0} is not allowed")]
    TokenNotAllowed(Address),
    #[error("amount must be greater than zero")]
    ZeroAmount,
    #[error("price must be greater than zero basis points")]
    ZeroPrice,
    #[error("position {0} not found")]
    PositionNotFound(PositionHandle),
    #[error("requested {requested} units but only {available} are available")]
    InsufficientUnitsAvailable { requested: Amount, available: Amount },
    #[error("requested {requested} units but only {listed} are listed")]
    InsufficientUnitsListed { requested: Amount, listed: Amount },
    #[error("caller {caller} is not authorized")]
    Unauthorized { caller: Address },
    #[error("asset {0} is not recognized by the asset registry")]
    UnknownAsset(Address),
    #[error("asset registry address is not configured")]
    FactoryNotConfigured,
    #[error("free balance {available} is below the {required} units requested")]
    InsufficientFreeBalance { required: Amount, available: Amount },
    #[error("amount arithmetic overflowed")]
    AmountOverflow,
    #[error("protocol fee of {0} bps exceeds 10000")]
    InvalidFee(PriceBps),
    /// A token movement failed mid-operation. `compensated` reports whether
    /// the movements already made for this call were reversed.
    #[error("token transfer failed (compensated: {compensated}): {source}")]
    TransferFailed {
        #[source]
        source: TransferError,
        compensated: bool,
    },
    #[error("journal error: {0}")]
    Storage(#[from] sqlx::Error),
    /// The restored journal lists more units of an asset than custody holds,
    /// or names an asset the registry does not know.
    #[error("journal lists {listed} units of {asset} but custody holds {held}")]
    EscrowMismatch {
        asset: Address,
        listed: Amount,
        held: Amount,
    },
}

impl LedgerError {
    /// True when the call was refused before anything happened.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            LedgerError::TransferFailed { .. }
                | LedgerError::Storage(_)
                | LedgerError::EscrowMismatch { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Ledger(err) => match err {
                LedgerError::PositionNotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                LedgerError::InsufficientUnitsAvailable { .. }
                | LedgerError::InsufficientUnitsListed { .. }
                | LedgerError::InsufficientFreeBalance { .. } => StatusCode::CONFLICT,
                LedgerError::FactoryNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                LedgerError::TransferFailed { .. } => StatusCode::BAD_GATEWAY,
                LedgerError::Storage(_) | LedgerError::EscrowMismatch { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "Config",
            AppError::Internal(_) => "Internal",
            AppError::NotFound(_) => "NotFound",
            AppError::BadRequest(_) => "BadRequest",
            AppError::Ledger(err) => match err {
                LedgerError::TokenNotAllowed(_) => "TokenNotAllowed",
                LedgerError::ZeroAmount => "ZeroAmount",
                LedgerError::ZeroPrice => "ZeroPrice",
                LedgerError::PositionNotFound(_) => "PositionNotFound",
                LedgerError::InsufficientUnitsAvailable { .. } => "InsufficientUnitsAvailable",
                LedgerError::InsufficientUnitsListed { .. } => "InsufficientUnitsListed",
                LedgerError::Unauthorized { .. } => "Unauthorized",
                LedgerError::UnknownAsset(_) => "UnknownAsset",
                LedgerError::FactoryNotConfigured => "FactoryNotConfigured",
                LedgerError::InsufficientFreeBalance { .. } => "InsufficientFreeBalance",
                LedgerError::AmountOverflow => "AmountOverflow",
                LedgerError::InvalidFee(_) => "InvalidFee",
                LedgerError::TransferFailed { .. } => "TransferFailed",
                LedgerError::Storage(_) => "Storage",
                LedgerError::EscrowMismatch { .. } => "EscrowMismatch",
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let rejected = match &self {
            AppError::Ledger(err) => err.is_rejection(),
            AppError::BadRequest(_) | AppError::NotFound(_) => true,
            _ => false,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "kind": kind,
            "rejected": rejected,
        }));

        (status, body).into_response()
    }
}
