/// Thin repository isolating SQL from control flow. Callers never issue
/// raw SQL directly; they call through here. All multi-row writes for a
/// chunk run inside one `sqlx::Transaction`, so a chunk's events,
/// position upserts and watermark advance are serialized together.
use crate::error::StorageError;
use crate::types::{ChainId, EventKind, Position, PositionEvent, PositionStatus, Source};
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::str::FromStr;

fn parse_bigint(s: &str, field: &'static str) -> Result<BigInt, StorageError> {
    BigInt::from_str(s)
        .map_err(|e| StorageError::Bootstrap(format!("corrupt {field} value {s:?}: {e}")))
}

fn event_kind_to_str(kind: EventKind) -> &'static str {
    kind.as_str()
}

fn event_kind_from_str(s: &str) -> Result<EventKind, StorageError> {
    match s {
        "INCREASE_LIQUIDITY" => Ok(EventKind::IncreaseLiquidity),
        "DECREASE_LIQUIDITY" => Ok(EventKind::DecreaseLiquidity),
        "COLLECT" => Ok(EventKind::Collect),
        other => Err(StorageError::Bootstrap(format!("unknown event_kind: {other}"))),
    }
}

fn source_from_str(s: &str) -> Result<Source, StorageError> {
    match s {
        "onchain" => Ok(Source::Onchain),
        "manual" => Ok(Source::Manual),
        other => Err(StorageError::Bootstrap(format!("unknown source: {other}"))),
    }
}

fn status_from_str(s: &str) -> Result<PositionStatus, StorageError> {
    match s {
        "active" => Ok(PositionStatus::Active),
        "closed" => Ok(PositionStatus::Closed),
        other => Err(StorageError::Bootstrap(format!("unknown status: {other}"))),
    }
}

// ============================================================================
// Watermark
// ============================================================================

pub async fn watermark_get(pool: &PgPool, chain: ChainId) -> Result<Option<u64>, StorageError> {
    let row = sqlx::query("SELECT last_processed_height FROM block_scanner_watermark WHERE chain = $1")
        .bind(chain.as_str())
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get::<i64, _>("last_processed_height") as u64))
}

pub async fn watermark_set_tx(
    tx: &mut Transaction<'_, Postgres>,
    chain: ChainId,
    height: u64,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO block_scanner_watermark (chain, last_processed_height, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (chain) DO UPDATE SET last_processed_height = $2, updated_at = now()
        "#,
    )
    .bind(chain.as_str())
    .bind(height as i64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// No-op if `height > current` (rollback only ever moves the watermark back).
pub async fn watermark_rollback(
    pool: &PgPool,
    chain: ChainId,
    height: u64,
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    let current = watermark_get_tx(&mut tx, chain).await?;
    if current.map(|c| height < c).unwrap_or(false) {
        watermark_set_tx(&mut tx, chain, height).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn watermark_get_tx(
    tx: &mut Transaction<'_, Postgres>,
    chain: ChainId,
) -> Result<Option<u64>, StorageError> {
    let row = sqlx::query("SELECT last_processed_height FROM block_scanner_watermark WHERE chain = $1")
        .bind(chain.as_str())
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.map(|r| r.get::<i64, _>("last_processed_height") as u64))
}

// ============================================================================
// Position events
// ============================================================================

pub async fn insert_events_tx(
    tx: &mut Transaction<'_, Postgres>,
    events: &[PositionEvent],
) -> Result<(), StorageError> {
    for event in events {
        sqlx::query(
            r#"
            INSERT INTO position_events
                (chain, nft_token_id, event_kind, block_number, transaction_index, log_index,
                 transaction_hash, block_timestamp, source, amount0, amount1, liquidity_delta, recipient)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (chain, transaction_hash, log_index) DO NOTHING
            "#,
        )
        .bind(event.chain.as_str())
        .bind(event.nft_token_id.to_string())
        .bind(event_kind_to_str(event.event_kind))
        .bind(event.block_number as i64)
        .bind(event.transaction_index as i64)
        .bind(event.log_index as i64)
        .bind(&event.transaction_hash)
        .bind(event.block_timestamp)
        .bind(event.source.as_str())
        .bind(event.amount0.to_string())
        .bind(event.amount1.to_string())
        .bind(event.liquidity_delta.as_ref().map(|v| v.to_string()))
        .bind(&event.recipient)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Deletes all `source = onchain` events for a chain strictly above `height`.
/// Returns the number of rows deleted. Idempotent: a second call with the
/// same height deletes nothing.
pub async fn delete_events_above_tx(
    tx: &mut Transaction<'_, Postgres>,
    chain: ChainId,
    height: u64,
) -> Result<u64, StorageError> {
    let result = sqlx::query(
        "DELETE FROM position_events WHERE chain = $1 AND block_number > $2 AND source = 'onchain'",
    )
    .bind(chain.as_str())
    .bind(height as i64)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<PositionEvent, StorageError> {
    Ok(PositionEvent {
        id: Some(row.get::<i64, _>("id")),
        chain: row
            .get::<String, _>("chain")
            .parse()
            .map_err(|e: String| StorageError::Bootstrap(e))?,
        nft_token_id: parse_bigint(&row.get::<String, _>("nft_token_id"), "nft_token_id")?,
        event_kind: event_kind_from_str(&row.get::<String, _>("event_kind"))?,
        block_number: row.get::<i64, _>("block_number") as u64,
        transaction_index: row.get::<i64, _>("transaction_index") as u64,
        log_index: row.get::<i64, _>("log_index") as u64,
        transaction_hash: row.get("transaction_hash"),
        block_timestamp: row.get::<DateTime<Utc>, _>("block_timestamp"),
        source: source_from_str(&row.get::<String, _>("source"))?,
        amount0: parse_bigint(&row.get::<String, _>("amount0"), "amount0")?,
        amount1: parse_bigint(&row.get::<String, _>("amount1"), "amount1")?,
        liquidity_delta: row
            .get::<Option<String>, _>("liquidity_delta")
            .map(|s| parse_bigint(&s, "liquidity_delta"))
            .transpose()?,
        recipient: row.get("recipient"),
    })
}

/// Fetch all events for a single position in canonical
/// `(blockNumber, transactionIndex, logIndex)` order.
pub async fn fetch_events_for_token(
    pool: &PgPool,
    chain: ChainId,
    nft_token_id: &BigInt,
) -> Result<Vec<PositionEvent>, StorageError> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM position_events
        WHERE chain = $1 AND nft_token_id = $2
        ORDER BY block_number ASC, transaction_index ASC, log_index ASC
        "#,
    )
    .bind(chain.as_str())
    .bind(nft_token_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_event).collect()
}

/// Distinct `(chain, nft_token_id)` pairs touched by events above a height,
/// used by the rollback subroutine to know which positions to re-fold.
pub async fn tokens_touched_above(
    pool: &PgPool,
    chain: ChainId,
    height: u64,
) -> Result<Vec<BigInt>, StorageError> {
    let rows = sqlx::query(
        "SELECT DISTINCT nft_token_id FROM position_events WHERE chain = $1 AND block_number > $2",
    )
    .bind(chain.as_str())
    .bind(height as i64)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|r| parse_bigint(&r.get::<String, _>("nft_token_id"), "nft_token_id"))
        .collect()
}

// ============================================================================
// Positions
// ============================================================================

pub async fn get_position(
    pool: &PgPool,
    chain: ChainId,
    nft_token_id: &BigInt,
) -> Result<Option<Position>, StorageError> {
    let row = sqlx::query("SELECT * FROM positions WHERE chain = $1 AND nft_token_id = $2")
        .bind(chain.as_str())
        .bind(nft_token_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(row_to_position).transpose()
}

fn row_to_position(row: sqlx::postgres::PgRow) -> Result<Position, StorageError> {
    Ok(Position {
        id: Some(row.get::<i64, _>("id")),
        user_id: row.get("user_id"),
        chain: row
            .get::<String, _>("chain")
            .parse()
            .map_err(|e: String| StorageError::Bootstrap(e))?,
        nft_token_id: parse_bigint(&row.get::<String, _>("nft_token_id"), "nft_token_id")?,
        pool_ref: row.get("pool_ref"),
        tick_lower: row.get("tick_lower"),
        tick_upper: row.get("tick_upper"),
        liquidity: parse_bigint(&row.get::<String, _>("liquidity"), "liquidity")?,
        status: status_from_str(&row.get::<String, _>("status"))?,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

pub async fn upsert_position_tx(
    tx: &mut Transaction<'_, Postgres>,
    chain: ChainId,
    nft_token_id: &BigInt,
    liquidity: &BigInt,
    status: PositionStatus,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO positions (chain, nft_token_id, liquidity, status, created_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (chain, nft_token_id) DO UPDATE SET liquidity = $3, status = $4
        "#,
    )
    .bind(chain.as_str())
    .bind(nft_token_id.to_string())
    .bind(liquidity.to_string())
    .bind(status.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
