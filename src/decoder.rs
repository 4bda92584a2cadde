/// Parses raw log topics/data into canonical `PositionEvent` records for
/// the three NFPM event kinds. Decode failures are fatal for that single
/// log, never for the batch: the caller counts and skips them.
use crate::error::DecodeError;
use crate::types::{ChainId, EventKind, Log, PositionEvent, Source};
use chrono::{TimeZone, Utc};
use num_bigint::{BigInt, Sign};

pub const TOPIC_INCREASE_LIQUIDITY: &str =
    "0x3067048beee31b25b2f1681f88dac838c8bba36af25bfb2b7cf7473a5847e35f";
pub const TOPIC_DECREASE_LIQUIDITY: &str =
    "0x26f6a048ee9138f2c0ce266f322cb99228e8d619ae2bff30c67f8dcf9d2377b4";
/// The authoritative NonfungiblePositionManager `Collect` topic-0. Other
/// values seen in the wild are stale and must not be accepted.
pub const TOPIC_COLLECT: &str =
    "0x40d0efd1a53d60ecbf40971b9daf7dc90178c3aadc7aab1765632738fa8b8f01";

const WORD_BYTES: usize = 32;

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

fn decode_hex(field: &'static str, s: &str) -> Result<Vec<u8>, DecodeError> {
    hex::decode(strip_0x(s)).map_err(|_| DecodeError::BadHex {
        field,
        value: s.to_string(),
    })
}

fn word_to_uint(word: &[u8]) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, word)
}

/// `topics[1]` is the indexed `tokenId`, a 32-byte big-endian word.
fn decode_token_id(log: &Log) -> Result<BigInt, DecodeError> {
    let raw = log.topics.get(1).ok_or(DecodeError::MissingTopic(1))?;
    let bytes = decode_hex("topics[1]", raw)?;
    Ok(word_to_uint(&bytes))
}

/// The last 20 bytes of a 32-byte address word, formatted as `0x`-prefixed hex.
fn word_to_address(word: &[u8]) -> String {
    format!("0x{}", hex::encode(&word[WORD_BYTES - 20..]))
}

pub fn decode_log(log: &Log) -> Result<PositionEvent, DecodeError> {
    let topic0 = log.topics.first().ok_or(DecodeError::MissingTopic(0))?;

    let kind = match topic0.as_str() {
        t if t.eq_ignore_ascii_case(TOPIC_INCREASE_LIQUIDITY) => EventKind::IncreaseLiquidity,
        t if t.eq_ignore_ascii_case(TOPIC_DECREASE_LIQUIDITY) => EventKind::DecreaseLiquidity,
        t if t.eq_ignore_ascii_case(TOPIC_COLLECT) => EventKind::Collect,
        other => return Err(DecodeError::UnknownTopic(other.to_string())),
    };

    let data = decode_hex("data", &log.data)?;
    let nft_token_id = decode_token_id(log)?;
    let block_timestamp = Utc
        .timestamp_opt(log.time_stamp as i64, 0)
        .single()
        .unwrap_or_else(Utc::now);

    match kind {
        EventKind::IncreaseLiquidity | EventKind::DecreaseLiquidity => {
            let kind_name = if kind == EventKind::IncreaseLiquidity {
                "IncreaseLiquidity"
            } else {
                "DecreaseLiquidity"
            };
            if data.len() != 3 * WORD_BYTES {
                return Err(DecodeError::BadDataLength {
                    kind: kind_name,
                    expected: 3 * WORD_BYTES,
                    got: data.len(),
                });
            }
            let liquidity = word_to_uint(&data[0..WORD_BYTES]);
            let amount0 = word_to_uint(&data[WORD_BYTES..2 * WORD_BYTES]);
            let amount1 = word_to_uint(&data[2 * WORD_BYTES..3 * WORD_BYTES]);

            Ok(PositionEvent {
                id: None,
                chain: log.chain,
                nft_token_id,
                event_kind: kind,
                block_number: log.block_number,
                transaction_index: log.transaction_index,
                log_index: log.log_index,
                transaction_hash: log.transaction_hash.clone(),
                block_timestamp,
                source: Source::Onchain,
                amount0,
                amount1,
                liquidity_delta: Some(liquidity),
                recipient: None,
            })
        }
        EventKind::Collect => {
            if data.len() != 3 * WORD_BYTES {
                return Err(DecodeError::BadDataLength {
                    kind: "Collect",
                    expected: 3 * WORD_BYTES,
                    got: data.len(),
                });
            }
            let recipient = word_to_address(&data[0..WORD_BYTES]);
            let amount0 = word_to_uint(&data[WORD_BYTES..2 * WORD_BYTES]);
            let amount1 = word_to_uint(&data[2 * WORD_BYTES..3 * WORD_BYTES]);

            Ok(PositionEvent {
                id: None,
                chain: log.chain,
                nft_token_id,
                event_kind: EventKind::Collect,
                block_number: log.block_number,
                transaction_index: log.transaction_index,
                log_index: log.log_index,
                transaction_hash: log.transaction_hash.clone(),
                block_timestamp,
                source: Source::Onchain,
                amount0,
                amount1,
                liquidity_delta: None,
                recipient: Some(recipient),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_hex(value: u64) -> String {
        let mut bytes = [0u8; WORD_BYTES];
        bytes[WORD_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
        hex::encode(bytes)
    }

    fn make_log(topic0: &str, token_id: u64, data_words: &[String]) -> Log {
        Log {
            chain: ChainId::Arbitrum,
            address: "0xC36442b4a4522E871399CD717aBDD847Ab11FE88".to_string(),
            block_number: 110,
            block_hash: "0xblockA".to_string(),
            time_stamp: 1_700_000_000,
            transaction_hash: "0xtxabc".to_string(),
            transaction_index: 0,
            log_index: 0,
            topics: vec![
                topic0.to_string(),
                format!("0x{}", word_hex(token_id)),
            ],
            data: format!("0x{}", data_words.join("")),
            removed: false,
        }
    }

    #[test]
    fn test_decode_increase_liquidity() {
        let log = make_log(
            TOPIC_INCREASE_LIQUIDITY,
            4891913,
            &[word_hex(500), word_hex(1000), word_hex(2000)],
        );
        let event = decode_log(&log).unwrap();
        assert_eq!(event.event_kind, EventKind::IncreaseLiquidity);
        assert_eq!(event.liquidity_delta.unwrap(), BigInt::from(500));
        assert_eq!(event.amount0, BigInt::from(1000));
        assert_eq!(event.amount1, BigInt::from(2000));
        assert_eq!(event.nft_token_id, BigInt::from(4891913));
        assert!(event.recipient.is_none());
    }

    #[test]
    fn test_decode_collect_recovers_recipient() {
        let addr_hex = "00000000000000000000000000000000000aa0"; // 20 bytes
        let addr_bytes = hex::decode(addr_hex).unwrap();
        let mut recipient_word = [0u8; WORD_BYTES];
        recipient_word[WORD_BYTES - 20..].copy_from_slice(&addr_bytes);
        let log = make_log(
            TOPIC_COLLECT,
            7,
            &[hex::encode(recipient_word), word_hex(10), word_hex(20)],
        );
        let event = decode_log(&log).unwrap();
        assert_eq!(event.event_kind, EventKind::Collect);
        assert_eq!(event.recipient.unwrap(), format!("0x{addr_hex}"));
        assert_eq!(event.amount0, BigInt::from(10));
        assert_eq!(event.amount1, BigInt::from(20));
    }

    #[test]
    fn test_unknown_topic_rejected() {
        let log = make_log("0xdeadbeef", 1, &[word_hex(0), word_hex(0), word_hex(0)]);
        assert!(matches!(decode_log(&log), Err(DecodeError::UnknownTopic(_))));
    }

    #[test]
    fn test_bad_data_length_rejected() {
        let mut log = make_log(TOPIC_INCREASE_LIQUIDITY, 1, &[word_hex(1), word_hex(2), word_hex(3)]);
        log.data = format!("{}ab", log.data); // one extra byte
        assert!(matches!(
            decode_log(&log),
            Err(DecodeError::BadDataLength { .. })
        ));
    }

    #[test]
    fn test_missing_token_id_topic_rejected() {
        let mut log = make_log(TOPIC_DECREASE_LIQUIDITY, 1, &[word_hex(1), word_hex(2), word_hex(3)]);
        log.topics.truncate(1);
        assert!(matches!(decode_log(&log), Err(DecodeError::MissingTopic(1))));
    }
}
