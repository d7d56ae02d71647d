//! The Postgres implementation of every store seam.
//!
//! The schema (see `migrations/`) enforces the uniqueness contracts at the
//! database: one account per `(user_id, account_type)`, one transaction per
//! idempotency key, one funding event per `(tx_hash, chain)`. Balance
//! safety runs under `SELECT ... FOR UPDATE` row locks taken in ascending
//! account-id order, and the funding queue claims batches with
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never overlap.
//!
//! All queries are runtime-checked `sqlx` queries; amounts travel as
//! `NUMERIC` and never as floats.

use std::str::FromStr;

use common::{store::StoreError, time::TimestampMs};
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPool, PgPoolOptions};

mod allocation_store;
mod chain_store;
mod ledger_store;
mod queue_store;
mod recon_store;
mod treasury_store;

/// The Postgres-backed store. Cheap to clone; all clones share the pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects and runs any pending migrations.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// --- Shared row-mapping helpers --- //

/// Maps a sqlx error onto the store trichotomy: unique violations are
/// conflicts, everything else is (retryable) unavailability.
pub(crate) fn map_sqlx_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::conflict(
                db_err.constraint().unwrap_or("unique constraint").to_owned(),
            );
        }
    }
    StoreError::unavailable(e.to_string())
}

/// Parses a snake_case unit-enum column through its serde representation.
pub(crate) fn parse_enum<T: DeserializeOwned>(
    raw: &str,
) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned()))
        .map_err(|e| {
            StoreError::unavailable(format!("bad enum value '{raw}': {e}"))
        })
}

pub(crate) fn timestamp(raw: i64) -> Result<TimestampMs, StoreError> {
    TimestampMs::try_from_i64(raw)
        .map_err(|e| StoreError::unavailable(e.to_string()))
}

pub(crate) fn opt_timestamp(
    raw: Option<i64>,
) -> Result<Option<TimestampMs>, StoreError> {
    raw.map(timestamp).transpose()
}

pub(crate) fn amount(
    raw: rust_decimal::Decimal,
) -> Result<common::amount::Amount, StoreError> {
    common::amount::Amount::try_from_decimal(raw)
        .map_err(|e| StoreError::unavailable(e.to_string()))
}

pub(crate) fn parse_from_str<T>(raw: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(raw)
        .map_err(|e| StoreError::unavailable(format!("bad value '{raw}': {e}")))
}
