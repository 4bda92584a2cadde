/// Compares freshly fetched logs against the recent window to detect
/// block-hash divergence and decide a rollback depth.
///
/// A log's transaction hash is a stable key: if the window already has an
/// entry for that hash but its recorded block hash differs from what was
/// just fetched, the chain was rewritten at that height. A provider may
/// also flag a log directly as `removed` when it knows a reorg orphaned it.
use crate::types::Log;
use crate::window::RecentWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgDecision {
    Advance,
    /// Roll back local state to this height (inclusive); events above it
    /// must be discarded and re-ingested.
    Rollback(u64),
}

/// Scans a batch of freshly fetched logs against the window and returns the
/// rollback decision, if any. Does not mutate the window; the caller applies
/// `RecentWindow::upsert`/`remove_above` based on the returned decision.
pub fn detect(window: &RecentWindow, logs: &[Log]) -> ReorgDecision {
    let mut divergence_heights: Vec<u64> = Vec::new();

    for log in logs {
        if log.removed {
            divergence_heights.push(log.block_number);
            continue;
        }
        if let Some(entry) = window.get(&log.transaction_hash) {
            if entry.block_hash != log.block_hash {
                divergence_heights.push(entry.block_number);
            }
        }
    }

    match divergence_heights.into_iter().min() {
        Some(h) => ReorgDecision::Rollback(h.saturating_sub(1)),
        None => ReorgDecision::Advance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChainId;
    use crate::window::WindowEntry;

    fn log(block_number: u64, block_hash: &str, tx_hash: &str, removed: bool) -> Log {
        Log {
            chain: ChainId::Arbitrum,
            address: "0xnfpm".to_string(),
            block_number,
            block_hash: block_hash.to_string(),
            time_stamp: 0,
            transaction_hash: tx_hash.to_string(),
            transaction_index: 0,
            log_index: 0,
            topics: vec![],
            data: String::new(),
            removed,
        }
    }

    #[test]
    fn test_advance_when_no_divergence() {
        let mut window = RecentWindow::new();
        window.upsert(
            "0xtx1",
            WindowEntry {
                block_number: 120,
                block_hash: "0xblockA".to_string(),
                transaction_index: 0,
                log_index: 0,
            },
        );
        let fresh = vec![log(120, "0xblockA", "0xtx1", false)];
        assert_eq!(detect(&window, &fresh), ReorgDecision::Advance);
    }

    #[test]
    fn test_rollback_on_hash_divergence_at_boundary() {
        // A reorg at height 120 rolls back to 119.
        let mut window = RecentWindow::new();
        window.upsert(
            "0xtx1",
            WindowEntry {
                block_number: 120,
                block_hash: "0xblockA".to_string(),
                transaction_index: 0,
                log_index: 0,
            },
        );
        let fresh = vec![log(120, "0xblockB", "0xtx1", false)];
        assert_eq!(detect(&window, &fresh), ReorgDecision::Rollback(119));
    }

    #[test]
    fn test_rollback_on_removed_flag() {
        let window = RecentWindow::new();
        let fresh = vec![log(150, "0xblockC", "0xtx9", true)];
        assert_eq!(detect(&window, &fresh), ReorgDecision::Rollback(149));
    }

    #[test]
    fn test_takes_minimum_divergence_height() {
        let mut window = RecentWindow::new();
        window.upsert(
            "0xtx1",
            WindowEntry {
                block_number: 130,
                block_hash: "0xblockA".to_string(),
                transaction_index: 0,
                log_index: 0,
            },
        );
        window.upsert(
            "0xtx2",
            WindowEntry {
                block_number: 125,
                block_hash: "0xblockX".to_string(),
                transaction_index: 0,
                log_index: 0,
            },
        );
        let fresh = vec![
            log(130, "0xblockB", "0xtx1", false),
            log(125, "0xblockY", "0xtx2", false),
        ];
        assert_eq!(detect(&window, &fresh), ReorgDecision::Rollback(124));
    }

    #[test]
    fn test_new_transaction_hash_has_no_prior_entry_and_does_not_diverge() {
        let window = RecentWindow::new();
        let fresh = vec![log(200, "0xblockZ", "0xbrandnew", false)];
        assert_eq!(detect(&window, &fresh), ReorgDecision::Advance);
    }
}
