/// Core domain types shared across the indexer, ledger and PnL calculator.
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of supported chains; each carries a chain-numeric-id and
/// endpoint that are configuration-resolved, not hardcoded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    Ethereum,
    Arbitrum,
    Base,
}

impl ChainId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Ethereum => "ethereum",
            ChainId::Arbitrum => "arbitrum",
            ChainId::Base => "base",
        }
    }

    pub fn all() -> [ChainId; 3] {
        [ChainId::Ethereum, ChainId::Arbitrum, ChainId::Base]
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(ChainId::Ethereum),
            "arbitrum" => Ok(ChainId::Arbitrum),
            "base" => Ok(ChainId::Base),
            other => Err(format!("unknown chain: {other}")),
        }
    }
}

/// Raw log record as returned by the log source API, prior to decoding.
#[derive(Debug, Clone)]
pub struct Log {
    pub chain: ChainId,
    pub address: String,
    pub block_number: u64,
    pub block_hash: String,
    pub time_stamp: u64,
    pub transaction_hash: String,
    pub transaction_index: u64,
    pub log_index: u64,
    /// topics[0] is the event signature hash; topics[1..] are indexed args.
    pub topics: Vec<String>,
    pub data: String,
    pub removed: bool,
}

impl Log {
    /// Sort/dedup key: lexicographic over (blockNumber, transactionIndex, logIndex).
    pub fn ordering_key(&self) -> (u64, u64, u64) {
        (self.block_number, self.transaction_index, self.log_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    IncreaseLiquidity,
    DecreaseLiquidity,
    Collect,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::IncreaseLiquidity => "INCREASE_LIQUIDITY",
            EventKind::DecreaseLiquidity => "DECREASE_LIQUIDITY",
            EventKind::Collect => "COLLECT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Onchain,
    Manual,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Onchain => "onchain",
            Source::Manual => "manual",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical decoded position event, the output of the event decoder and
/// the unit the ledger folds over.
#[derive(Debug, Clone)]
pub struct PositionEvent {
    pub id: Option<i64>,
    pub chain: ChainId,
    pub nft_token_id: BigInt,
    pub event_kind: EventKind,
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
    pub transaction_hash: String,
    pub block_timestamp: DateTime<Utc>,
    pub source: Source,
    pub amount0: BigInt,
    pub amount1: BigInt,
    /// Liquidity delta, always non-negative; meaning (add/remove) is implied
    /// by `event_kind`. `None` for COLLECT.
    pub liquidity_delta: Option<BigInt>,
    /// Only present on COLLECT.
    pub recipient: Option<String>,
}

impl PositionEvent {
    pub fn ordering_key(&self) -> (u64, u64, u64) {
        (self.block_number, self.transaction_index, self.log_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Active,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Active => "active",
            PositionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked NFPM position. `pool_ref`/`tick_lower`/`tick_upper` are resolved
/// by a collaborator outside the indexer's scope (position metadata lookup)
/// and are left unset here.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub chain: ChainId,
    pub nft_token_id: BigInt,
    pub pool_ref: Option<String>,
    pub tick_lower: Option<i32>,
    pub tick_upper: Option<i32>,
    pub liquidity: BigInt,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
}

/// A contiguous interval during which a position's deposited capital was
/// constant. Derived/recomputed by the ledger; not independently authoritative.
#[derive(Debug, Clone)]
pub struct CapitalPeriod {
    pub position_id: Option<i64>,
    /// The event that opened this period.
    pub event_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Duration in whole seconds; `None` while the period is open.
    pub duration_seconds: Option<i64>,
    pub cost_basis_in_quote: BigInt,
    /// `duration_seconds * cost_basis_in_quote`, valid only once closed.
    pub weight: Option<BigInt>,
}

/// Per-COLLECT fee total and its allocation across active capital periods.
#[derive(Debug, Clone)]
pub struct FeeDistribution {
    pub event_id: Option<i64>,
    pub total_fees_quote: BigInt,
    /// (period index into the owning Vec<CapitalPeriod>, allocated amount)
    pub allocations: Vec<(usize, BigInt)>,
}

/// Parse a blockNumber/logIndex/timeStamp field that may be hex (`0x...`) or decimal.
pub fn parse_hex_or_decimal_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_round_trip() {
        for chain in ChainId::all() {
            let parsed: ChainId = chain.as_str().parse().unwrap();
            assert_eq!(parsed, chain);
        }
    }

    #[test]
    fn test_parse_hex_or_decimal() {
        assert_eq!(parse_hex_or_decimal_u64("0x10").unwrap(), 16);
        assert_eq!(parse_hex_or_decimal_u64("16").unwrap(), 16);
    }

    #[test]
    fn test_log_ordering_key() {
        let chain = ChainId::Arbitrum;
        let log = Log {
            chain,
            address: "0x0".into(),
            block_number: 10,
            block_hash: "0xabc".into(),
            time_stamp: 0,
            transaction_hash: "0xdef".into(),
            transaction_index: 1,
            log_index: 2,
            topics: vec![],
            data: String::new(),
            removed: false,
        };
        assert_eq!(log.ordering_key(), (10, 1, 2));
    }
}
