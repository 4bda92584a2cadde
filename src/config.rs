/// Layered static configuration: `config.toml` plus `INDEXER__*`
/// environment overrides, resolved once at startup into a typed, eagerly
/// validated structure. Malformed configuration is a fatal startup error,
/// never a runtime surprise.
use crate::error::ConfigError;
use crate::types::ChainId;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

static GLOBAL_CONFIG: OnceCell<IndexerConfig> = OnceCell::new();

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_numeric_id: u64,
    pub endpoint: String,
    pub api_key: String,
    pub nfpm_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawIndexerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_safety_lag")]
    pub safety_lag: u64,
    #[serde(default = "default_window_depth")]
    pub window_depth: u64,
    #[serde(default = "default_max_range")]
    pub max_range: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    pub database_url: String,
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
}

fn default_poll_interval_secs() -> u64 {
    12
}
fn default_safety_lag() -> u64 {
    64
}
fn default_window_depth() -> u64 {
    64
}
fn default_max_range() -> u64 {
    1000
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_backoff_ms() -> u64 {
    500
}

/// Validated, process-wide indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub poll_interval: Duration,
    pub safety_lag: u64,
    pub window_depth: u64,
    pub max_range: u64,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub database_url: String,
    pub chains: HashMap<ChainId, ChainConfig>,
}

impl IndexerConfig {
    pub fn chain(&self, chain: ChainId) -> Option<&ChainConfig> {
        self.chains.get(&chain)
    }

    pub fn configured_chains(&self) -> impl Iterator<Item = &ChainId> {
        self.chains.keys()
    }
}

fn validate(raw: RawIndexerConfig) -> Result<IndexerConfig, ConfigError> {
    if raw.safety_lag < raw.window_depth {
        return Err(ConfigError::SafetyLagTooSmall {
            safety_lag: raw.safety_lag,
            window_depth: raw.window_depth,
        });
    }
    if raw.chains.is_empty() {
        return Err(ConfigError::NoChainsConfigured);
    }

    let mut chains = HashMap::with_capacity(raw.chains.len());
    for (name, cfg) in raw.chains {
        let chain: ChainId = name.parse().map_err(|_| ConfigError::Invalid {
            field: "chains".to_string(),
            reason: format!("unknown chain key: {name}"),
        })?;
        let hex_body = cfg
            .nfpm_address
            .strip_prefix("0x")
            .unwrap_or(&cfg.nfpm_address);
        let bytes = hex::decode(hex_body).map_err(|e| ConfigError::Invalid {
            field: format!("chains.{name}.nfpm_address"),
            reason: e.to_string(),
        })?;
        if bytes.len() != 20 {
            return Err(ConfigError::Invalid {
                field: format!("chains.{name}.nfpm_address"),
                reason: format!("expected 20 bytes, got {}", bytes.len()),
            });
        }
        chains.insert(chain, cfg);
    }

    Ok(IndexerConfig {
        poll_interval: Duration::from_secs(raw.poll_interval_secs),
        safety_lag: raw.safety_lag,
        window_depth: raw.window_depth,
        max_range: raw.max_range,
        max_retries: raw.max_retries,
        base_backoff: Duration::from_millis(raw.base_backoff_ms),
        database_url: raw.database_url,
        chains,
    })
}

/// Load configuration from `config.toml`, overridable by `INDEXER__*`
/// environment variables (e.g. `INDEXER__SAFETY_LAG=32`), then validate.
pub fn load_config() -> Result<IndexerConfig, ConfigError> {
    let raw = config::Config::builder()
        .add_source(config::File::with_name("config.toml").required(false))
        .add_source(config::Environment::with_prefix("INDEXER").separator("__"))
        .build()?;
    let raw: RawIndexerConfig = raw.try_deserialize()?;
    validate(raw)
}

/// Initialize the global configuration. Must be called exactly once, early
/// in `main`.
pub fn init_global_config() -> Result<(), ConfigError> {
    let cfg = load_config()?;
    GLOBAL_CONFIG
        .set(cfg)
        .map_err(|_| ConfigError::Invalid {
            field: "<global>".to_string(),
            reason: "config already initialized".to_string(),
        })
}

/// Fetch the global configuration. Panics if `init_global_config` was not
/// called successfully first — by the time any other module runs, the
/// fatal startup check has already happened in `main`.
pub fn get_global_config() -> &'static IndexerConfig {
    GLOBAL_CONFIG
        .get()
        .expect("config not initialized - call init_global_config() first")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with(safety_lag: u64, window_depth: u64, chains: HashMap<String, ChainConfig>) -> RawIndexerConfig {
        RawIndexerConfig {
            poll_interval_secs: 12,
            safety_lag,
            window_depth,
            max_range: 1000,
            max_retries: 5,
            base_backoff_ms: 500,
            database_url: "postgres://localhost/test".to_string(),
            chains,
        }
    }

    fn sample_chain() -> ChainConfig {
        ChainConfig {
            chain_numeric_id: 42161,
            endpoint: "https://api.example.com".to_string(),
            api_key: "key".to_string(),
            nfpm_address: "0xC36442b4a4522E871399CD717aBDD847Ab11FE88".to_string(),
        }
    }

    #[test]
    fn test_safety_lag_must_be_at_least_window_depth() {
        let raw = raw_with(32, 64, HashMap::new());
        let err = validate(raw).unwrap_err();
        assert!(matches!(err, ConfigError::SafetyLagTooSmall { .. }));
    }

    #[test]
    fn test_requires_at_least_one_chain() {
        let raw = raw_with(64, 64, HashMap::new());
        let err = validate(raw).unwrap_err();
        assert!(matches!(err, ConfigError::NoChainsConfigured));
    }

    #[test]
    fn test_rejects_bad_nfpm_address_length() {
        let mut chains = HashMap::new();
        let mut chain = sample_chain();
        chain.nfpm_address = "0xdead".to_string();
        chains.insert("arbitrum".to_string(), chain);
        let raw = raw_with(64, 64, chains);
        let err = validate(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_valid_config_passes() {
        let mut chains = HashMap::new();
        chains.insert("arbitrum".to_string(), sample_chain());
        let raw = raw_with(64, 64, chains);
        let cfg = validate(raw).unwrap();
        assert_eq!(cfg.chains.len(), 1);
        assert!(cfg.chain(ChainId::Arbitrum).is_some());
    }
}
