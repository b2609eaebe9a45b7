pub mod admin;
pub mod assets;
pub mod events;
pub mod health;
pub mod positions;
pub mod sandbox;

use crate::domain::{Address, Amount};
use crate::error::AppError;
use crate::orchestration::Marketplace;
use axum::http::HeaderMap;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Header naming the account a request acts for.
pub const CALLER_HEADER: &str = "x-caller";

#[derive(Clone)]
pub struct AppState {
    pub marketplace: Arc<Marketplace>,
    /// Present when the marketplace runs on in-process collaborators.
    pub sandbox: Option<sandbox::Sandbox>,
}

impl AppState {
    pub fn new(marketplace: Arc<Marketplace>) -> Self {
        Self {
            marketplace,
            sandbox: None,
        }
    }

    pub fn with_sandbox(mut self, sandbox: sandbox::Sandbox) -> Self {
        self.sandbox = Some(sandbox);
        self
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/positions", get(positions::get_user_positions))
        .route("/v1/positions/enter", post(positions::enter_position))
        .route("/v1/positions/list", post(positions::list_position))
        .route("/v1/positions/:handle", get(positions::get_position))
        .route("/v1/positions/:handle/buy", post(positions::buy_position))
        .route(
            "/v1/positions/:handle/delist",
            post(positions::delist_position),
        )
        .route("/v1/admin/settings", get(admin::get_settings))
        .route("/v1/admin/allowed-tokens", put(admin::set_allowed_token))
        .route("/v1/admin/vault", put(admin::set_vault))
        .route("/v1/admin/factory", put(admin::set_factory))
        .route("/v1/admin/fee", put(admin::set_fee))
        .route("/v1/assets", post(assets::create_asset))
        .route("/v1/assets/:address", get(assets::get_asset))
        .route("/v1/assets/:address/url", put(assets::update_asset_url))
        .route("/v1/sandbox/mint", post(sandbox::mint))
        .route("/v1/events", get(events::get_events))
        .layer(cors)
        .with_state(state)
}

/// The acting account, taken from the `x-caller` header.
pub(crate) fn caller(headers: &HeaderMap) -> Result<Address, AppError> {
    let value = headers
        .get(CALLER_HEADER)
        .ok_or_else(|| AppError::BadRequest(format!("missing {} header", CALLER_HEADER)))?
        .to_str()
        .map_err(|_| AppError::BadRequest(format!("invalid {} header", CALLER_HEADER)))?;
    Address::from_str(value)
        .map_err(|e| AppError::BadRequest(format!("invalid {} header: {}", CALLER_HEADER, e)))
}

pub(crate) fn parse_address(field: &str, value: &str) -> Result<Address, AppError> {
    Address::from_str(value).map_err(|e| AppError::BadRequest(format!("Invalid {}: {}", field, e)))
}

pub(crate) fn parse_amount(field: &str, value: &str) -> Result<Amount, AppError> {
    Amount::from_token_str(value)
        .map_err(|e| AppError::BadRequest(format!("Invalid {}: {}", field, e)))
}
