/// Typed error taxonomy, one `thiserror` enum per component seam:
/// transient, range-too-large, schema/decode, invariant, storage,
/// configuration.
use thiserror::Error;

/// Errors surfaced by the log source client.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network timeout, connection failure, or 5xx after retries exhausted.
    #[error("log source unavailable for chain {chain}: {message}")]
    Unavailable { chain: String, message: String },

    /// The endpoint rejected the requested block span ("result window exceeded").
    #[error("requested range too large for chain {chain}: {from_block}..{to_block}")]
    WindowTooLarge {
        chain: String,
        from_block: u64,
        to_block: u64,
    },

    /// Response body did not match the expected schema.
    #[error("malformed response from log source for chain {chain}: {reason}")]
    Malformed { chain: String, reason: String },
}

/// Errors surfaced by the event decoder. Never fatal to a batch; the
/// offending log is skipped and the error counted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unrecognized topic0: {0}")]
    UnknownTopic(String),

    #[error("bad data length for {kind}: expected {expected} bytes, got {got}")]
    BadDataLength {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("malformed hex in log field {field}: {value}")]
    BadHex { field: &'static str, value: String },

    #[error("missing indexed topic at position {0}")]
    MissingTopic(usize),
}

/// Errors surfaced by the position ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Folding an event would have driven liquidity negative. The event is
    /// quarantined (kept, flagged) rather than dropped.
    #[error("liquidity invariant violated for token {nft_token_id} at event {event_id:?}: would go negative ({attempted})")]
    Invariant {
        nft_token_id: String,
        event_id: Option<i64>,
        attempted: String,
    },

    #[error("price lookup failed: {0}")]
    Price(String),
}

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("schema bootstrap failed: {0}")]
    Bootstrap(String),
}

/// Errors surfaced by configuration loading. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration field: {0}")]
    Missing(String),

    #[error("invalid configuration field {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("no chains configured; at least one of ethereum/arbitrum/base is required")]
    NoChainsConfigured,

    #[error("safety_lag ({safety_lag}) must be >= window_depth ({window_depth})")]
    SafetyLagTooSmall { safety_lag: u64, window_depth: u64 },

    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

/// The indexer loop's own composing error, so `main`'s top-level match
/// arms correspond 1:1 to the error categories above, including exit-code
/// mapping.
#[derive(Debug, Error)]
pub enum IndexerLoopError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("shutdown requested")]
    Shutdown,
}
