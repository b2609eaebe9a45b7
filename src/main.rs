use anyhow::Context;
use stakeledger::{
    api, config::Config, db::init_db, Address, InMemoryAssetFactory, InMemoryTokens, Marketplace,
    MarketplaceParams, Repository,
};
use stakeledger::api::sandbox::Sandbox;
use std::net::SocketAddr;
use std::sync::Arc;

/// Factory address of the in-process registry when none is configured.
const SANDBOX_FACTORY: Address = Address::from_bytes([0xfa; 20]);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let port = config.port;

    // The binary runs against in-process token and asset collaborators.
    let tokens = InMemoryTokens::new();
    let factory_address = config.factory_address.unwrap_or(SANDBOX_FACTORY);
    let factory = InMemoryAssetFactory::new(factory_address, tokens.clone());
    tracing::info!(factory = %factory_address, "in-memory asset factory ready");

    let params = MarketplaceParams::from(&config);
    let marketplace = match &config.database_path {
        Some(path) => {
            let pool = init_db(path)
                .await
                .with_context(|| format!("failed to initialize journal at {}", path))?;
            let repo = Arc::new(Repository::new(pool));
            // In-process balances start empty on every launch, so a journal
            // holding open listings is refused rather than left unbacked.
            Marketplace::open(
                params,
                Arc::new(tokens.clone()),
                Arc::new(factory.clone()),
                repo,
            )
            .await
            .context("failed to restore ledger from journal")?
        }
        None => {
            tracing::warn!("DATABASE_PATH not set, ledger state will not survive a restart");
            Marketplace::new(params, Arc::new(tokens.clone()), Arc::new(factory.clone()))
                .context("failed to build marketplace")?
        }
    };

    let state =
        api::AppState::new(Arc::new(marketplace)).with_sandbox(Sandbox::new(tokens, factory));
    let app = api::create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
