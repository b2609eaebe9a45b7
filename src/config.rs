use crate::domain::{Address, PriceBps, PAR_BPS};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Journal location. Without it the ledger lives in memory only.
    pub database_path: Option<String>,
    pub admin_address: Address,
    pub custody_address: Address,
    pub vault_address: Option<Address>,
    pub factory_address: Option<Address>,
    pub protocol_fee_bps: PriceBps,
    pub allowed_tokens: Vec<Address>,
    pub event_buffer: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let admin_address = required_address(&env_map, "ADMIN_ADDRESS")?;
        let custody_address = required_address(&env_map, "CUSTODY_ADDRESS")?;
        let vault_address = optional_address(&env_map, "VAULT_ADDRESS")?;
        let factory_address = optional_address(&env_map, "FACTORY_ADDRESS")?;

        let protocol_fee_bps = env_map
            .get("PROTOCOL_FEE_BPS")
            .map(|s| s.as_str())
            .unwrap_or("0")
            .parse::<PriceBps>()
            .ok()
            .filter(|bps| *bps <= PAR_BPS)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "PROTOCOL_FEE_BPS".to_string(),
                    format!("must be an integer between 0 and {}", PAR_BPS),
                )
            })?;

        let allowed_tokens = parse_allowed_tokens_from_map(&env_map)?;

        let event_buffer = env_map
            .get("EVENT_BUFFER")
            .map(|s| s.as_str())
            .unwrap_or("1024")
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "EVENT_BUFFER".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        Ok(Config {
            port,
            database_path,
            admin_address,
            custody_address,
            vault_address,
            factory_address,
            protocol_fee_bps,
            allowed_tokens,
            event_buffer,
        })
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address, ConfigError> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn required_address(env_map: &HashMap<String, String>, key: &str) -> Result<Address, ConfigError> {
    let value = env_map
        .get(key)
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))?;
    parse_address(key, value)
}

fn optional_address(
    env_map: &HashMap<String, String>,
    key: &str,
) -> Result<Option<Address>, ConfigError> {
    match env_map.get(key).map(|s| s.trim()) {
        None | Some("") => Ok(None),
        Some(value) => parse_address(key, value).map(Some),
    }
}

fn parse_allowed_tokens_from_map(
    env_map: &HashMap<String, String>,
) -> Result<Vec<Address>, ConfigError> {
    let Some(tokens_str) = env_map.get("ALLOWED_TOKENS") else {
        return Ok(Vec::new());
    };
    tokens_str
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| parse_address("ALLOWED_TOKENS", s))
        .collect()
}
