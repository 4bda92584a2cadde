/// The per-chain scheduler tying the log source, recent window, reorg
/// detector, event decoder and repository together. One `ChainIndexer`
/// value owns a chain's window and consecutive-failure counter; no
/// process-wide singleton beyond the shared pool and metrics registry.
use crate::config::ChainConfig;
use crate::decoder::{self, TOPIC_COLLECT, TOPIC_DECREASE_LIQUIDITY, TOPIC_INCREASE_LIQUIDITY};
use crate::error::{IndexerLoopError, SourceError, StorageError};
use crate::ledger::{self, PriceOracle};
use crate::log_source::LogSourceClient;
use crate::metrics;
use crate::reorg::{self, ReorgDecision};
use crate::repository;
use crate::types::{ChainId, Log};
use crate::window::{RecentWindow, WindowEntry};
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A tick that fails 30 times in a row is surfaced to `main` as a
/// persistent source failure, mapped to its own exit code.
const PERSISTENT_FAILURE_THRESHOLD: u32 = 30;
/// Consecutive failures before an operator alert is logged (not yet fatal).
const ALERT_THRESHOLD: u32 = 5;

/// Per-chain static knobs this loop needs, carved out of the global config
/// so `ChainIndexer` doesn't depend on the whole `IndexerConfig` shape.
#[derive(Debug, Clone)]
pub struct ChainIndexerConfig {
    pub poll_interval: Duration,
    pub safety_lag: u64,
    pub window_depth: u64,
    pub max_range: u64,
    pub chain_cfg: ChainConfig,
}

/// Liquidity recomputation after a rollback needs no price information —
/// only the ledger's running `liquidity`, never `costBasisInQuote`, is
/// persisted by this loop. Capital periods are computed on demand by
/// callers of the PnL calculator, not written here.
struct NullPriceOracle;
impl PriceOracle for NullPriceOracle {
    fn value_in_quote(
        &self,
        _chain: ChainId,
        _pool_ref: Option<&str>,
        _block_number: u64,
        _amount0: &num_bigint::BigInt,
        _amount1: &num_bigint::BigInt,
    ) -> Result<num_bigint::BigInt, String> {
        Ok(num_bigint::BigInt::from(0))
    }
}

enum ChunkOutcome {
    Advanced,
    RolledBack(u64),
}

pub struct ChainIndexer {
    chain: ChainId,
    pool: PgPool,
    client: LogSourceClient,
    config: ChainIndexerConfig,
    window: RecentWindow,
    consecutive_failures: u32,
}

impl ChainIndexer {
    pub fn new(chain: ChainId, pool: PgPool, client: LogSourceClient, config: ChainIndexerConfig) -> Self {
        Self {
            chain,
            pool,
            client,
            config,
            window: RecentWindow::new(),
            consecutive_failures: 0,
        }
    }

    /// Runs until `shutdown` is cancelled or a source failure streak exceeds
    /// `PERSISTENT_FAILURE_THRESHOLD`, in which case the loop stops and
    /// returns the triggering error for `main` to map to exit code 2.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), IndexerLoopError> {
        loop {
            if shutdown.is_cancelled() {
                tracing::info!(chain = %self.chain, "indexer loop shutting down gracefully");
                return Ok(());
            }

            let mut sleep_for = self.config.poll_interval;
            match self.tick().await {
                Ok(_) => {
                    self.consecutive_failures = 0;
                }
                Err(IndexerLoopError::Source(e)) => {
                    self.consecutive_failures += 1;
                    metrics::record_source_failure(self.chain.as_str());
                    tracing::warn!(chain = %self.chain, error = %e, streak = self.consecutive_failures, "log source unavailable this tick");
                    if self.consecutive_failures == ALERT_THRESHOLD {
                        tracing::error!(chain = %self.chain, "log source has failed {ALERT_THRESHOLD} consecutive ticks");
                    }
                    if self.consecutive_failures > PERSISTENT_FAILURE_THRESHOLD {
                        return Err(IndexerLoopError::Source(e));
                    }
                    sleep_for = self.config.poll_interval * 2;
                }
                Err(e) => {
                    // Storage/ledger errors: logged, chunk already aborted
                    // inside tick() without advancing the watermark; retried
                    // next tick at the same range.
                    tracing::error!(chain = %self.chain, error = %e, "tick failed, will retry next tick");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(chain = %self.chain, "indexer loop shutting down gracefully");
                    return Ok(());
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    async fn tick(&mut self) -> Result<(), IndexerLoopError> {
        metrics::record_tick(self.chain.as_str());

        let tip = self.client.head_block(self.chain, &self.config.chain_cfg).await?;
        let target = tip.saturating_sub(self.config.safety_lag);
        let watermark = repository::watermark_get(&self.pool, self.chain).await?.unwrap_or(0);

        if watermark >= target {
            return Ok(());
        }

        let mut cursor = watermark + 1;
        let mut chunk_size = self.config.max_range.max(1);

        while cursor <= target {
            let chunk_to = (cursor + chunk_size - 1).min(target);
            let timer = metrics::Timer::new();

            match self.process_chunk(cursor, chunk_to).await {
                Ok(ChunkOutcome::Advanced) => {
                    metrics::record_chunk_duration(self.chain.as_str(), &timer);
                    metrics::set_watermark_height(self.chain.as_str(), chunk_to);
                    cursor = chunk_to + 1;
                    chunk_size = self.config.max_range.max(1);
                }
                Ok(ChunkOutcome::RolledBack(h)) => {
                    metrics::record_chunk_duration(self.chain.as_str(), &timer);
                    metrics::record_reorg(self.chain.as_str());
                    metrics::set_watermark_height(self.chain.as_str(), h);
                    // Break out of the current tick; the next tick re-fetches
                    // the affected range from the rolled-back watermark.
                    return Ok(());
                }
                Err(IndexerLoopError::Source(SourceError::WindowTooLarge { .. })) => {
                    chunk_size = (chunk_size / 2).max(1);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        let boundary = target.saturating_sub(self.config.window_depth);
        self.window.prune(boundary);
        Ok(())
    }

    /// Fetches, reconciles and persists one `[from, to]` block range.
    async fn process_chunk(&mut self, from: u64, to: u64) -> Result<ChunkOutcome, IndexerLoopError> {
        let chain_cfg = self.config.chain_cfg.clone();
        let mut logs: Vec<Log> = Vec::new();
        for topic in [TOPIC_INCREASE_LIQUIDITY, TOPIC_DECREASE_LIQUIDITY, TOPIC_COLLECT] {
            let mut fetched = self.client.fetch_logs(self.chain, &chain_cfg, from, to, topic).await?;
            logs.append(&mut fetched);
        }
        logs.sort_by_key(|l| l.ordering_key());
        logs.dedup_by_key(|l| l.ordering_key());

        match reorg::detect(&self.window, &logs) {
            ReorgDecision::Rollback(h) => {
                self.rollback_to(h).await?;
                Ok(ChunkOutcome::RolledBack(h))
            }
            ReorgDecision::Advance => {
                self.window.upsert_batch(logs.iter().map(|l| {
                    (
                        l.transaction_hash.clone(),
                        WindowEntry {
                            block_number: l.block_number,
                            block_hash: l.block_hash.clone(),
                            transaction_index: l.transaction_index,
                            log_index: l.log_index,
                        },
                    )
                }));

                let mut decoded = Vec::with_capacity(logs.len());
                for log in &logs {
                    match decoder::decode_log(log) {
                        Ok(event) => decoded.push(event),
                        Err(e) => {
                            metrics::record_decode_error(self.chain.as_str());
                            tracing::warn!(chain = %self.chain, error = %e, tx = %log.transaction_hash, "decode failed, skipping log");
                        }
                    }
                }

                let mut touched_tokens: Vec<num_bigint::BigInt> = decoded
                    .iter()
                    .map(|e| e.nft_token_id.clone())
                    .collect();
                touched_tokens.sort();
                touched_tokens.dedup();

                // Positions are folded from committed history plus this
                // chunk's decoded events, then written in the same
                // transaction as the events themselves and the watermark
                // advance, per the "one transaction per chunk" resource rule.
                let mut recomputed = Vec::with_capacity(touched_tokens.len());
                for token in &touched_tokens {
                    let mut history =
                        repository::fetch_events_for_token(&self.pool, self.chain, token).await?;
                    history.extend(decoded.iter().filter(|e| &e.nft_token_id == token).cloned());
                    history.sort_by_key(|e| e.ordering_key());
                    let (state, errors) = ledger::fold_events(self.chain, None, &history, &NullPriceOracle);
                    for err in &errors {
                        tracing::warn!(chain = %self.chain, nft_token_id = %token, error = %err, "ledger fold reported an issue");
                    }
                    recomputed.push((token.clone(), state));
                }

                let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
                repository::insert_events_tx(&mut tx, &decoded).await?;
                for (token, state) in &recomputed {
                    repository::upsert_position_tx(&mut tx, self.chain, token, &state.liquidity, state.status)
                        .await?;
                }
                repository::watermark_set_tx(&mut tx, self.chain, to).await?;
                tx.commit().await.map_err(StorageError::from)?;

                Ok(ChunkOutcome::Advanced)
            }
        }
    }

    /// Re-derives a position's liquidity/status from its full committed
    /// event history and upserts the result. Safe to call redundantly: it
    /// is a pure function of `position_events`.
    async fn refold_position(&self, nft_token_id: &num_bigint::BigInt) -> Result<(), IndexerLoopError> {
        let events = repository::fetch_events_for_token(&self.pool, self.chain, nft_token_id).await?;
        let (state, errors) = ledger::fold_events(self.chain, None, &events, &NullPriceOracle);
        for err in &errors {
            tracing::warn!(chain = %self.chain, nft_token_id = %nft_token_id, error = %err, "ledger fold reported an issue");
        }

        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        repository::upsert_position_tx(&mut tx, self.chain, nft_token_id, &state.liquidity, state.status)
            .await?;
        tx.commit().await.map_err(StorageError::from)?;
        Ok(())
    }

    /// Deletes events above `h`, recomputes affected positions, shrinks
    /// the window, and moves the watermark back. Idempotent — running it
    /// twice with the same `h` deletes nothing the second time.
    async fn rollback_to(&mut self, h: u64) -> Result<(), IndexerLoopError> {
        let touched = repository::tokens_touched_above(&self.pool, self.chain, h).await?;

        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        repository::delete_events_above_tx(&mut tx, self.chain, h).await?;
        repository::watermark_set_tx(&mut tx, self.chain, h).await?;
        tx.commit().await.map_err(StorageError::from)?;

        for token in &touched {
            self.refold_position(token).await?;
        }

        self.window.remove_above(h);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_halving_respects_minimum_of_one_block() {
        let mut chunk_size: u64 = 1;
        chunk_size = (chunk_size / 2).max(1);
        assert_eq!(chunk_size, 1);
    }

    #[test]
    fn test_chunk_halving_sequence() {
        let mut chunk_size: u64 = 1000;
        chunk_size = (chunk_size / 2).max(1);
        assert_eq!(chunk_size, 500);
        chunk_size = (chunk_size / 2).max(1);
        assert_eq!(chunk_size, 250);
    }
}
