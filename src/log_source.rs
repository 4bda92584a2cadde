/// Pulls filtered contract logs from an external etherscan-style indexer
/// API for a chain, address and topic, with retry and backoff. Owns no
/// state beyond its `http::Client` and the per-chain base URL/API key, so
/// it is safe to share across ticks.
use crate::config::ChainConfig;
use crate::error::SourceError;
use crate::types::{parse_hex_or_decimal_u64, ChainId, Log};
use serde::Deserialize;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct LogsApiResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawLog {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "blockHash")]
    block_hash: String,
    #[serde(rename = "timeStamp")]
    time_stamp: String,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "transactionIndex")]
    transaction_index: String,
    #[serde(rename = "logIndex")]
    log_index: String,
    #[serde(default)]
    removed: bool,
}

pub struct LogSourceClient {
    http: reqwest::Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl LogSourceClient {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("building reqwest client"),
            max_retries,
            base_backoff,
        }
    }

    /// One topic per call; the caller unions results across the three topics.
    pub async fn fetch_logs(
        &self,
        chain: ChainId,
        chain_cfg: &ChainConfig,
        from_block: u64,
        to_block: u64,
        topic0: &str,
    ) -> Result<Vec<Log>, SourceError> {
        debug_assert!(from_block <= to_block);

        let url = format!(
            "{}?module=logs&action=getLogs&fromBlock={}&toBlock={}&address={}&topic0={}&apikey={}",
            chain_cfg.endpoint, from_block, to_block, chain_cfg.nfpm_address, topic0, chain_cfg.api_key,
        );

        let body = self.get_with_retry(chain, &url).await?;
        let parsed: LogsApiResponse = serde_json::from_str(&body).map_err(|e| SourceError::Malformed {
            chain: chain.as_str().to_string(),
            reason: format!("invalid JSON envelope: {e}"),
        })?;

        if parsed.message.to_lowercase().contains("result window") || parsed.message.to_lowercase().contains("window is too large") {
            return Err(SourceError::WindowTooLarge {
                chain: chain.as_str().to_string(),
                from_block,
                to_block,
            });
        }

        // `status` "0" with an empty result means "no logs", not an error.
        let result_is_empty_array =
            matches!(&parsed.result, serde_json::Value::Array(a) if a.is_empty());
        if parsed.status != "1" && !result_is_empty_array {
            return Err(SourceError::Malformed {
                chain: chain.as_str().to_string(),
                reason: format!("API status {}: {}", parsed.status, parsed.message),
            });
        }

        let raw_logs: Vec<RawLog> = match parsed.result {
            serde_json::Value::Array(_) => serde_json::from_value(parsed.result).map_err(|e| {
                SourceError::Malformed {
                    chain: chain.as_str().to_string(),
                    reason: format!("invalid log array: {e}"),
                }
            })?,
            _ => Vec::new(),
        };

        let mut logs = Vec::with_capacity(raw_logs.len());
        for raw in raw_logs {
            logs.push(convert_raw_log(chain, raw).map_err(|reason| SourceError::Malformed {
                chain: chain.as_str().to_string(),
                reason,
            })?);
        }

        logs.sort_by_key(|l| l.ordering_key());
        logs.dedup_by_key(|l| l.ordering_key());
        Ok(logs)
    }

    /// Reads the chain's current tip via the same provider's `eth_blockNumber` proxy.
    pub async fn head_block(&self, chain: ChainId, chain_cfg: &ChainConfig) -> Result<u64, SourceError> {
        let url = format!(
            "{}?module=proxy&action=eth_blockNumber&apikey={}",
            chain_cfg.endpoint, chain_cfg.api_key,
        );
        let body = self.get_with_retry(chain, &url).await?;

        #[derive(Deserialize)]
        struct ProxyResponse {
            result: String,
        }
        let parsed: ProxyResponse = serde_json::from_str(&body).map_err(|e| SourceError::Malformed {
            chain: chain.as_str().to_string(),
            reason: format!("invalid eth_blockNumber response: {e}"),
        })?;
        parse_hex_or_decimal_u64(&parsed.result).map_err(|e| SourceError::Malformed {
            chain: chain.as_str().to_string(),
            reason: format!("unparseable block number {:?}: {e}", parsed.result),
        })
    }

    /// Exponential backoff starting at `base_backoff` (doubled on rate-limit
    /// responses to a 2s floor), capped at 30s, up to `max_retries` attempts.
    async fn get_with_retry(&self, chain: ChainId, url: &str) -> Result<String, SourceError> {
        let mut delay = self.base_backoff;
        let mut last_error = String::new();

        for attempt in 0..self.max_retries {
            match self.http.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.as_u16() == 429 {
                        last_error = "rate limited (429)".to_string();
                        delay = delay.max(Duration::from_secs(2));
                        tracing::warn!(chain = %chain, attempt = attempt + 1, "log source rate-limited, backing off");
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(MAX_BACKOFF);
                        continue;
                    }
                    if status.is_server_error() {
                        last_error = format!("server error {status}");
                        tracing::warn!(chain = %chain, attempt = attempt + 1, %status, "log source 5xx, retrying");
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(MAX_BACKOFF);
                        continue;
                    }
                    return resp.text().await.map_err(|e| SourceError::Unavailable {
                        chain: chain.as_str().to_string(),
                        message: format!("reading response body: {e}"),
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(chain = %chain, attempt = attempt + 1, error = %e, "log source transport error, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
            }
        }

        Err(SourceError::Unavailable {
            chain: chain.as_str().to_string(),
            message: format!("exhausted {} retries: {}", self.max_retries, last_error),
        })
    }
}

fn convert_raw_log(chain: ChainId, raw: RawLog) -> Result<Log, String> {
    Ok(Log {
        chain,
        address: raw.address,
        block_number: parse_hex_or_decimal_u64(&raw.block_number)
            .map_err(|e| format!("blockNumber {:?}: {e}", raw.block_number))?,
        block_hash: raw.block_hash,
        time_stamp: parse_hex_or_decimal_u64(&raw.time_stamp)
            .map_err(|e| format!("timeStamp {:?}: {e}", raw.time_stamp))?,
        transaction_hash: raw.transaction_hash,
        transaction_index: parse_hex_or_decimal_u64(&raw.transaction_index)
            .map_err(|e| format!("transactionIndex {:?}: {e}", raw.transaction_index))?,
        log_index: parse_hex_or_decimal_u64(&raw.log_index)
            .map_err(|e| format!("logIndex {:?}: {e}", raw.log_index))?,
        topics: raw.topics,
        data: raw.data,
        removed: raw.removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_raw_log_parses_hex_fields() {
        let raw = RawLog {
            address: "0xnfpm".to_string(),
            topics: vec!["0xsig".to_string()],
            data: "0x00".to_string(),
            block_number: "0x6e".to_string(),
            block_hash: "0xblock".to_string(),
            time_stamp: "1700000000".to_string(),
            transaction_hash: "0xtx".to_string(),
            transaction_index: "0x1".to_string(),
            log_index: "2".to_string(),
            removed: false,
        };
        let log = convert_raw_log(ChainId::Arbitrum, raw).unwrap();
        assert_eq!(log.block_number, 110);
        assert_eq!(log.transaction_index, 1);
        assert_eq!(log.log_index, 2);
    }

    #[test]
    fn test_dedup_and_sort_ordering() {
        use crate::types::Log as L;
        let mut logs = vec![
            L {
                chain: ChainId::Arbitrum,
                address: "a".into(),
                block_number: 10,
                block_hash: "h".into(),
                time_stamp: 0,
                transaction_hash: "tx2".into(),
                transaction_index: 1,
                log_index: 0,
                topics: vec![],
                data: String::new(),
                removed: false,
            },
            L {
                chain: ChainId::Arbitrum,
                address: "a".into(),
                block_number: 5,
                block_hash: "h".into(),
                time_stamp: 0,
                transaction_hash: "tx1".into(),
                transaction_index: 0,
                log_index: 0,
                topics: vec![],
                data: String::new(),
                removed: false,
            },
        ];
        logs.sort_by_key(|l| l.ordering_key());
        assert_eq!(logs[0].block_number, 5);
        assert_eq!(logs[1].block_number, 10);
    }
}
