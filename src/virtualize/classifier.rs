//! Visibility classifier: splits a visibility batch into restore / evict / keep.
//!
//! Protection is computed once per batch from the tracked blocks in document
//! order:
//! - the trailing window (last `trailing_blocks` blocks) is never evicted
//! - any block whose content is still streaming is never evicted
//!
//! Protection only prevents eviction. It never forces a restore, and losing
//! protection does not evict a block until a later batch reports it again.

use std::collections::{HashMap, HashSet};

use crate::config::ProtectionConfig;
use crate::host::{BlockId, VisibilityEntry};

/// Outcome of classifying one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Intersecting blocks: bring their content back.
    pub restore: Vec<BlockId>,
    /// Off-screen, unprotected blocks: evict.
    pub evict: Vec<BlockId>,
    /// Off-screen but protected this batch: leave as they are.
    pub keep: Vec<BlockId>,
}

/// The eviction-protection policy.
pub struct VisibilityClassifier {
    config: ProtectionConfig,
}

impl VisibilityClassifier {
    pub fn new(config: ProtectionConfig) -> Self {
        Self { config }
    }

    /// Compute the set of blocks that must not be evicted this batch.
    ///
    /// `ordered` is the tracked blocks in document order; `is_streaming`
    /// queries the host's streaming flag.
    pub fn protected_blocks(
        &self,
        ordered: &[BlockId],
        is_streaming: impl Fn(BlockId) -> bool,
    ) -> HashSet<BlockId> {
        let start = ordered.len().saturating_sub(self.config.trailing_blocks);
        let mut protected: HashSet<BlockId> = ordered[start..].iter().copied().collect();

        if self.config.protect_streaming {
            protected.extend(ordered.iter().copied().filter(|&b| is_streaming(b)));
        }

        protected
    }

    /// Classify a batch against a precomputed protected set.
    ///
    /// A block reported more than once keeps only its last entry, so the
    /// result does not depend on how the batch was ordered otherwise.
    pub fn classify(
        &self,
        batch: &[VisibilityEntry],
        protected: &HashSet<BlockId>,
    ) -> Classification {
        let mut latest: HashMap<BlockId, bool> = HashMap::with_capacity(batch.len());
        let mut order = Vec::with_capacity(batch.len());
        for entry in batch {
            if latest.insert(entry.block, entry.is_intersecting).is_none() {
                order.push(entry.block);
            }
        }

        let mut out = Classification::default();
        for block in order {
            if latest[&block] {
                out.restore.push(block);
            } else if protected.contains(&block) {
                out.keep.push(block);
            } else {
                out.evict.push(block);
            }
        }
        out
    }
}
