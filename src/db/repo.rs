//! Journal repository: persists committed ledger transitions and restores them.

use crate::domain::{Address, Amount, LedgerEvent, Position, PositionHandle, PriceBps, TimeMs};
use crate::engine::BookChange;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;

const VAULT_KEY: &str = "vault";
const FACTORY_KEY: &str = "factory";
const FEE_KEY: &str = "protocol_fee_bps";

/// Everything one ledger operation commits, written in a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    pub book: Option<BookChange>,
    /// Admin events also update the settings and allowed-token tables.
    pub events: Vec<LedgerEvent>,
}

/// Ledger state as last committed to the journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalState {
    /// Open positions with their listing sequence.
    pub positions: Vec<(Position, u64)>,
    pub nonces: Vec<(Address, u64)>,
    pub allowed_tokens: Vec<Address>,
    pub vault: Option<Address>,
    pub factory: Option<Address>,
    pub protocol_fee_bps: Option<PriceBps>,
}

/// An event as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournaledEvent {
    pub seq: i64,
    pub recorded_at: TimeMs,
    pub event: LedgerEvent,
}

pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Write a changeset atomically.
    pub async fn commit(&self, changeset: &Changeset) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if let Some(change) = &changeset.book {
            write_book_change(&mut tx, change).await?;
        }
        let recorded_at = TimeMs::now();
        for event in &changeset.events {
            write_admin_effect(&mut tx, event).await?;
            let payload =
                serde_json::to_string(event).map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO events (kind, handle, payload, recorded_at_ms)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(event.kind())
            .bind(event.handle().map(|h| h.to_string()))
            .bind(payload)
            .bind(recorded_at.as_ms())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    /// Load everything needed to rebuild the in-memory ledger.
    pub async fn load_state(&self) -> Result<JournalState, sqlx::Error> {
        let positions = sqlx::query(
            r#"
            SELECT handle, asset, settlement_token, owner, units, price_bps, nonce, seq
            FROM positions
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(position_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let nonces = sqlx::query("SELECT owner, next_nonce FROM owner_nonces")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| {
                let owner = parse_col::<Address>(row, "owner")?;
                let next_nonce: i64 = row.try_get("next_nonce")?;
                Ok((owner, next_nonce as u64))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let allowed_tokens = sqlx::query("SELECT token FROM allowed_tokens ORDER BY token")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| parse_col::<Address>(row, "token"))
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = JournalState {
            positions,
            nonces,
            allowed_tokens,
            ..JournalState::default()
        };

        for row in sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?
        {
            let key: String = row.try_get("key")?;
            match key.as_str() {
                VAULT_KEY => state.vault = Some(parse_col(&row, "value")?),
                FACTORY_KEY => state.factory = Some(parse_col(&row, "value")?),
                FEE_KEY => state.protocol_fee_bps = Some(parse_col(&row, "value")?),
                other => tracing::warn!(key = other, "ignoring unknown setting"),
            }
        }

        Ok(state)
    }

    /// Journaled events, oldest first, optionally for a single position.
    pub async fn query_events(
        &self,
        handle: Option<&PositionHandle>,
        limit: i64,
    ) -> Result<Vec<JournaledEvent>, sqlx::Error> {
        let rows = match handle {
            Some(handle) => {
                sqlx::query(
                    r#"
                    SELECT seq, payload, recorded_at_ms FROM events
                    WHERE handle = ?
                    ORDER BY seq ASC LIMIT ?
                    "#,
                )
                .bind(handle.to_string())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT seq, payload, recorded_at_ms FROM events ORDER BY seq ASC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                let event = serde_json::from_str(&payload)
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                Ok(JournaledEvent {
                    seq: row.try_get("seq")?,
                    recorded_at: TimeMs::new(row.try_get("recorded_at_ms")?),
                    event,
                })
            })
            .collect()
    }
}

async fn write_book_change(
    tx: &mut Transaction<'_, Sqlite>,
    change: &BookChange,
) -> Result<(), sqlx::Error> {
    match change {
        BookChange::Listed {
            position,
            seq,
            next_nonce,
        } => {
            sqlx::query(
                r#"
                INSERT INTO positions
                    (handle, asset, settlement_token, owner, units, price_bps, nonce, seq)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(position.handle.to_string())
            .bind(position.asset.to_string())
            .bind(position.preferred_settlement_token.to_string())
            .bind(position.owner.to_string())
            .bind(position.units.to_string())
            .bind(i64::from(position.price_bps))
            .bind(position.nonce as i64)
            .bind(*seq as i64)
            .execute(&mut **tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO owner_nonces (owner, next_nonce) VALUES (?, ?)
                ON CONFLICT(owner) DO UPDATE SET next_nonce = excluded.next_nonce
                "#,
            )
            .bind(position.owner.to_string())
            .bind(*next_nonce as i64)
            .execute(&mut **tx)
            .await?;
        }
        BookChange::Reduced { handle, units } => {
            sqlx::query("UPDATE positions SET units = ? WHERE handle = ?")
                .bind(units.to_string())
                .bind(handle.to_string())
                .execute(&mut **tx)
                .await?;
        }
        BookChange::Closed { handle, .. } => {
            sqlx::query("DELETE FROM positions WHERE handle = ?")
                .bind(handle.to_string())
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

async fn write_admin_effect(
    tx: &mut Transaction<'_, Sqlite>,
    event: &LedgerEvent,
) -> Result<(), sqlx::Error> {
    let setting = match event {
        LedgerEvent::AllowedTokenSet { token, allowed } => {
            let sql = if *allowed {
                "INSERT INTO allowed_tokens (token) VALUES (?) ON CONFLICT(token) DO NOTHING"
            } else {
                "DELETE FROM allowed_tokens WHERE token = ?"
            };
            sqlx::query(sql)
                .bind(token.to_string())
                .execute(&mut **tx)
                .await?;
            return Ok(());
        }
        LedgerEvent::VaultAddressSet { vault } => (VAULT_KEY, vault.to_string()),
        LedgerEvent::FactoryAddressSet { factory } => (FACTORY_KEY, factory.to_string()),
        LedgerEvent::ProtocolFeeSet { fee_bps } => (FEE_KEY, fee_bps.to_string()),
        _ => return Ok(()),
    };

    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(setting.0)
    .bind(setting.1)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_col<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn position_from_row(row: &SqliteRow) -> Result<(Position, u64), sqlx::Error> {
    let price_bps: i64 = row.try_get("price_bps")?;
    let nonce: i64 = row.try_get("nonce")?;
    let seq: i64 = row.try_get("seq")?;
    let position = Position {
        handle: parse_col(row, "handle")?,
        asset: parse_col(row, "asset")?,
        preferred_settlement_token: parse_col(row, "settlement_token")?,
        owner: parse_col(row, "owner")?,
        units: parse_col::<Amount>(row, "units")?,
        price_bps: PriceBps::try_from(price_bps).map_err(|e| sqlx::Error::ColumnDecode {
            index: "price_bps".to_string(),
            source: Box::new(e),
        })?,
        nonce: nonce as u64,
    };
    Ok((position, seq as u64))
}
