/// Connection pool construction and schema bootstrap for the relational
/// store backing the watermark, position event and position tables.
use crate::error::StorageError;
use sqlx::postgres::{PgPoolOptions, PgPool};
use std::time::Duration;

pub async fn build_pool(database_url: &str) -> Result<PgPool, StorageError> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(StorageError::from)
}

/// Creates the four tables this crate owns if they do not already exist.
/// Idempotent; safe to run on every startup.
pub async fn bootstrap_schema(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS block_scanner_watermark (
            chain TEXT PRIMARY KEY,
            last_processed_height BIGINT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS position_events (
            id BIGSERIAL PRIMARY KEY,
            chain TEXT NOT NULL,
            nft_token_id TEXT NOT NULL,
            event_kind TEXT NOT NULL,
            block_number BIGINT NOT NULL,
            transaction_index BIGINT NOT NULL,
            log_index BIGINT NOT NULL,
            transaction_hash TEXT NOT NULL,
            block_timestamp TIMESTAMPTZ NOT NULL,
            source TEXT NOT NULL,
            amount0 TEXT NOT NULL,
            amount1 TEXT NOT NULL,
            liquidity_delta TEXT,
            recipient TEXT,
            UNIQUE (chain, transaction_hash, log_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS position_events_token_order_idx \
         ON position_events (chain, nft_token_id, block_number, transaction_index, log_index)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT,
            chain TEXT NOT NULL,
            nft_token_id TEXT NOT NULL,
            pool_ref TEXT,
            tick_lower INTEGER,
            tick_upper INTEGER,
            liquidity TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (chain, nft_token_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS capital_periods (
            id BIGSERIAL PRIMARY KEY,
            position_id BIGINT NOT NULL REFERENCES positions(id),
            event_id BIGINT,
            start_time TIMESTAMPTZ NOT NULL,
            end_time TIMESTAMPTZ,
            duration_seconds BIGINT,
            cost_basis_in_quote TEXT NOT NULL,
            weight TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
