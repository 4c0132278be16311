//! Eviction cache: exclusive owner of a block's detached content while evicted.
//!
//! Holds at most one entry per block. There is no capacity limit: the cache
//! is bounded by the number of off-screen blocks and exists for correctness,
//! not for reuse.

use std::collections::HashMap;

use thiserror::Error;

use crate::host::BlockId;

#[derive(Error, Debug)]
pub enum CacheError<F> {
    /// An entry already exists. The rejected content is handed back untouched.
    #[error("Block {block} already has a cache entry")]
    Occupied { block: BlockId, content: F },
}

/// Content removed from a block plus the height it occupied.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<F> {
    pub content: F,
    pub height: f64,
}

/// Key → payload store for evicted blocks.
#[derive(Debug)]
pub struct EvictionCache<F> {
    entries: HashMap<BlockId, CacheEntry<F>>,
}

impl<F> Default for EvictionCache<F> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<F> EvictionCache<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the detached content of `block`.
    ///
    /// Fails without modifying the cache if the block already has an entry.
    pub fn put(&mut self, block: BlockId, content: F, height: f64) -> Result<(), CacheError<F>> {
        if self.entries.contains_key(&block) {
            return Err(CacheError::Occupied { block, content });
        }
        self.entries.insert(block, CacheEntry { content, height });
        Ok(())
    }

    /// Remove and return the entry for `block`.
    pub fn take(&mut self, block: BlockId) -> Option<CacheEntry<F>> {
        self.entries.remove(&block)
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.entries.contains_key(&block)
    }

    /// Recorded height of an evicted block.
    pub fn height_of(&self, block: BlockId) -> Option<f64> {
        self.entries.get(&block).map(|e| e.height)
    }

    /// Drop every entry without restoring anything.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    /// Hand every remaining entry to `restore`, leaving the cache empty.
    pub fn drain_each(&mut self, mut restore: impl FnMut(BlockId, CacheEntry<F>)) {
        for (block, entry) in self.entries.drain() {
            restore(block, entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_rejects_second_entry() {
        let mut cache = EvictionCache::new();
        cache.put(1, vec!["a"], 120.0).unwrap();

        match cache.put(1, vec!["b"], 80.0) {
            Err(CacheError::Occupied { block, content }) => {
                assert_eq!(block, 1);
                assert_eq!(content, vec!["b"]);
            }
            Ok(()) => panic!("second put must be rejected"),
        }

        // Original entry untouched.
        assert_eq!(cache.height_of(1), Some(120.0));
        assert_eq!(cache.take(1).unwrap().content, vec!["a"]);
    }

    #[test]
    fn test_take_removes_entry() {
        let mut cache = EvictionCache::new();
        cache.put(7, "x", 10.0).unwrap();
        assert!(cache.contains(7));
        assert!(cache.take(7).is_some());
        assert!(cache.take(7).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_drain_each_visits_all_and_empties() {
        let mut cache = EvictionCache::new();
        for i in 0..5u64 {
            cache.put(i, i * 10, 1.0).unwrap();
        }
        let mut seen = Vec::new();
        cache.drain_each(|block, entry| seen.push((block, entry.content)));
        seen.sort();
        assert_eq!(seen, vec![(0, 0), (1, 10), (2, 20), (3, 30), (4, 40)]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_reports_dropped() {
        let mut cache = EvictionCache::new();
        cache.put(1, (), 1.0).unwrap();
        cache.put(2, (), 1.0).unwrap();
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.len(), 0);
    }
}
