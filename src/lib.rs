pub mod bigmath;
pub mod config;
pub mod db;
pub mod decoder;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod log_source;
pub mod metrics;
pub mod pnl;
pub mod reorg;
pub mod repository;
pub mod telemetry;
pub mod types;
pub mod window;
