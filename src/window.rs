/// An in-memory map keyed by transaction hash, holding enough of the last
/// N blocks' logs to let the reorg detector notice a block-hash
/// divergence. Pure in-memory structure; rebuildable by refetching
/// `[watermark - windowDepth, watermark]` after a restart.
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_index: u64,
    pub log_index: u64,
}

#[derive(Debug, Default)]
pub struct RecentWindow {
    by_tx_hash: HashMap<String, WindowEntry>,
    /// Index from block height to the set of tx hashes seen at that height,
    /// so `prune`/`removeAbove` don't need a full scan.
    by_height: BTreeMap<u64, HashSet<String>>,
}

impl RecentWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_tx_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tx_hash.is_empty()
    }

    pub fn get(&self, transaction_hash: &str) -> Option<&WindowEntry> {
        self.by_tx_hash.get(transaction_hash)
    }

    /// Insert or overwrite the entry for `transaction_hash`.
    pub fn upsert(&mut self, transaction_hash: &str, entry: WindowEntry) {
        if let Some(old) = self.by_tx_hash.get(transaction_hash) {
            if old.block_number != entry.block_number {
                if let Some(set) = self.by_height.get_mut(&old.block_number) {
                    set.remove(transaction_hash);
                    if set.is_empty() {
                        self.by_height.remove(&old.block_number);
                    }
                }
            }
        }
        self.by_height
            .entry(entry.block_number)
            .or_default()
            .insert(transaction_hash.to_string());
        self.by_tx_hash.insert(transaction_hash.to_string(), entry);
    }

    /// Bulk upsert preserving insertion order.
    pub fn upsert_batch(&mut self, entries: impl IntoIterator<Item = (String, WindowEntry)>) {
        for (tx_hash, entry) in entries {
            self.upsert(&tx_hash, entry);
        }
    }

    /// Delete all entries with `blockNumber <= boundary`.
    pub fn prune(&mut self, boundary: u64) {
        let heights_to_drop: Vec<u64> = self
            .by_height
            .range(..=boundary)
            .map(|(h, _)| *h)
            .collect();
        for height in heights_to_drop {
            if let Some(tx_hashes) = self.by_height.remove(&height) {
                for tx_hash in tx_hashes {
                    self.by_tx_hash.remove(&tx_hash);
                }
            }
        }
    }

    /// Delete entries strictly above `height` (used on rollback).
    pub fn remove_above(&mut self, height: u64) {
        let heights_to_drop: Vec<u64> = self
            .by_height
            .range((height + 1)..)
            .map(|(h, _)| *h)
            .collect();
        for h in heights_to_drop {
            if let Some(tx_hashes) = self.by_height.remove(&h) {
                for tx_hash in tx_hashes {
                    self.by_tx_hash.remove(&tx_hash);
                }
            }
        }
    }

    /// Empty the map (used on catastrophic rollback).
    pub fn clear(&mut self) {
        self.by_tx_hash.clear();
        self.by_height.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(block_number: u64, block_hash: &str) -> WindowEntry {
        WindowEntry {
            block_number,
            block_hash: block_hash.to_string(),
            transaction_index: 0,
            log_index: 0,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let mut w = RecentWindow::new();
        w.upsert("0xaaa", entry(10, "0xblockA"));
        assert_eq!(w.get("0xaaa").unwrap().block_hash, "0xblockA");
    }

    #[test]
    fn test_prune_removes_entries_at_or_below_boundary() {
        let mut w = RecentWindow::new();
        w.upsert("0xaaa", entry(10, "0xA"));
        w.upsert("0xbbb", entry(20, "0xB"));
        w.upsert("0xccc", entry(30, "0xC"));
        w.prune(20);
        assert!(w.get("0xaaa").is_none());
        assert!(w.get("0xbbb").is_none());
        assert!(w.get("0xccc").is_some());
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_remove_above_keeps_boundary_height() {
        let mut w = RecentWindow::new();
        w.upsert("0xaaa", entry(10, "0xA"));
        w.upsert("0xbbb", entry(20, "0xB"));
        w.remove_above(10);
        assert!(w.get("0xaaa").is_some());
        assert!(w.get("0xbbb").is_none());
    }

    #[test]
    fn test_upsert_moves_entry_between_heights() {
        let mut w = RecentWindow::new();
        w.upsert("0xaaa", entry(10, "0xA"));
        w.upsert("0xaaa", entry(11, "0xA2"));
        assert_eq!(w.get("0xaaa").unwrap().block_number, 11);
        w.prune(10);
        // entry moved to height 11, should survive prune(10)
        assert!(w.get("0xaaa").is_some());
    }

    #[test]
    fn test_clear() {
        let mut w = RecentWindow::new();
        w.upsert("0xaaa", entry(10, "0xA"));
        w.clear();
        assert!(w.is_empty());
    }
}
