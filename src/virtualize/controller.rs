//! Virtualization controller: applies classifier decisions to the host tree.
//!
//! Eviction moves a block's children into the [`EvictionCache`] and pins the
//! block to its measured height; restoration reverses that. Both are
//! idempotent and never fail outward: inconsistent states are logged and
//! repaired locally.

use tracing::{debug, error, warn};

use crate::config::ProtectionConfig;
use crate::host::{BlockId, DocumentTree, VisibilityEntry};
use crate::virtualize::cache::{CacheError, EvictionCache};
use crate::virtualize::classifier::VisibilityClassifier;
use crate::virtualize::registry::TrackingRegistry;

/// Result of a single eviction request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvictOutcome {
    Evicted { height: f64 },
    AlreadyVirtualized,
    /// The block is not in the live tree.
    Detached,
    /// Height 0: the block has not been laid out yet.
    NotLaidOut,
    /// The cache already held an entry for a non-virtualized block.
    Occupied,
}

/// Result of a single restoration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    NotVirtualized,
    /// Flagged virtualized with nothing cached; the flag was cleared.
    MissingEntry,
}

/// Per-batch tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub evicted: usize,
    pub restored: usize,
    pub kept: usize,
    /// Requests that changed nothing (idempotent repeats, unlaid-out blocks, ...).
    pub skipped: usize,
}

pub struct Controller<F> {
    cache: EvictionCache<F>,
    classifier: VisibilityClassifier,
}

impl<F> Controller<F> {
    pub fn new(protection: ProtectionConfig) -> Self {
        Self {
            cache: EvictionCache::new(),
            classifier: VisibilityClassifier::new(protection),
        }
    }

    pub fn cache(&self) -> &EvictionCache<F> {
        &self.cache
    }

    pub fn virtualized_count(&self) -> usize {
        self.cache.len()
    }

    /// Detach `block`'s content into the cache behind a fixed-height placeholder.
    pub fn evict<T>(&mut self, tree: &mut T, block: BlockId) -> EvictOutcome
    where
        T: DocumentTree<Fragment = F> + ?Sized,
    {
        if tree.is_virtualized(block) {
            return EvictOutcome::AlreadyVirtualized;
        }
        if !tree.is_attached(block) {
            return EvictOutcome::Detached;
        }
        let height = tree.measure_height(block);
        if !height.is_finite() || height <= 0.0 {
            return EvictOutcome::NotLaidOut;
        }
        if self.cache.contains(block) {
            error!(block, "Cache entry exists for a block that is not virtualized");
            return EvictOutcome::Occupied;
        }

        let content = tree.detach_children(block);
        if let Err(CacheError::Occupied { block, content }) = self.cache.put(block, content, height)
        {
            error!(block, "Cache rejected eviction, re-attaching content");
            tree.attach_children(block, content);
            return EvictOutcome::Occupied;
        }
        tree.set_min_height(block, Some(height));
        tree.set_virtualized(block, true);

        debug!(block, height, "Evicted block");
        EvictOutcome::Evicted { height }
    }

    /// Re-attach `block`'s cached content and drop its placeholder.
    pub fn restore<T>(&mut self, tree: &mut T, block: BlockId) -> RestoreOutcome
    where
        T: DocumentTree<Fragment = F> + ?Sized,
    {
        if !tree.is_virtualized(block) {
            return RestoreOutcome::NotVirtualized;
        }

        let Some(entry) = self.cache.take(block) else {
            warn!(block, "Virtualized block has no cache entry, clearing flag");
            tree.set_virtualized(block, false);
            return RestoreOutcome::MissingEntry;
        };

        tree.attach_children(block, entry.content);
        tree.set_min_height(block, None);
        tree.set_virtualized(block, false);

        debug!(block, height = entry.height, "Restored block");
        RestoreOutcome::Restored
    }

    /// Classify one visibility batch and apply every decision.
    ///
    /// Decisions for different blocks are independent; they are applied in
    /// batch order.
    pub fn apply_batch<T>(
        &mut self,
        tree: &mut T,
        registry: &TrackingRegistry,
        batch: &[VisibilityEntry],
    ) -> BatchOutcome
    where
        T: DocumentTree<Fragment = F> + ?Sized,
    {
        let ordered = registry.ordered(&*tree);
        let protected = self
            .classifier
            .protected_blocks(&ordered, |b| tree.is_streaming(b));
        let decision = self.classifier.classify(batch, &protected);

        let mut outcome = BatchOutcome {
            kept: decision.keep.len(),
            ..Default::default()
        };
        for block in decision.restore {
            match self.restore(tree, block) {
                RestoreOutcome::Restored => outcome.restored += 1,
                _ => outcome.skipped += 1,
            }
        }
        for block in decision.evict {
            match self.evict(tree, block) {
                EvictOutcome::Evicted { .. } => outcome.evicted += 1,
                _ => outcome.skipped += 1,
            }
        }
        outcome
    }

    /// Restore every cached block that is still attached, then empty the cache.
    ///
    /// Blocks that have left the tree lose their content but not their
    /// placeholder state: flag and height pin are cleared on them too.
    pub fn restore_all<T>(&mut self, tree: &mut T) -> usize
    where
        T: DocumentTree<Fragment = F> + ?Sized,
    {
        let mut restored = 0;
        self.cache.drain_each(|block, entry| {
            if !tree.is_attached(block) {
                debug!(block, "Dropping cached content of detached block");
                tree.set_min_height(block, None);
                tree.set_virtualized(block, false);
                return;
            }
            tree.attach_children(block, entry.content);
            tree.set_min_height(block, None);
            tree.set_virtualized(block, false);
            restored += 1;
        });
        restored
    }

    /// Drop every cache entry without touching the tree.
    pub fn discard_all(&mut self) -> usize {
        self.cache.clear()
    }
}
