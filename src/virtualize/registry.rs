//! Tracking registry: the blocks currently subscribed to visibility signals.
//!
//! Registration is idempotent and monotonic until [`TrackingRegistry::clear`],
//! which mirrors disconnecting the signal source.

use std::collections::HashSet;

use tracing::trace;

use crate::host::{BlockId, DocumentTree, MutationRecord, VisibilitySource};

#[derive(Debug, Default)]
pub struct TrackingRegistry {
    tracked: HashSet<BlockId>,
}

impl TrackingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `block` and subscribe it, unless it is already tracked.
    ///
    /// Returns `true` if the block was newly registered.
    pub fn register<S: VisibilitySource + ?Sized>(&mut self, source: &mut S, block: BlockId) -> bool {
        if !self.tracked.insert(block) {
            return false;
        }
        source.observe(block);
        trace!(block, "Tracking block");
        true
    }

    /// Register every block currently in the document.
    pub fn register_all<H>(&mut self, host: &mut H) -> usize
    where
        H: DocumentTree + VisibilitySource,
    {
        let mut added = 0;
        for block in host.blocks() {
            if self.register(&mut *host, block) {
                added += 1;
            }
        }
        added
    }

    /// Scan one mutation batch for inserted blocks, including nested ones.
    ///
    /// Returns the number of newly registered blocks.
    pub fn register_inserted<H>(&mut self, host: &mut H, records: &[MutationRecord]) -> usize
    where
        H: DocumentTree + VisibilitySource,
    {
        let mut added = 0;
        for record in records {
            for &node in &record.added {
                for block in host.blocks_in_subtree(node) {
                    if self.register(&mut *host, block) {
                        added += 1;
                    }
                }
            }
        }
        added
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.tracked.contains(&block)
    }

    /// Tracked blocks in document order, as the host currently lays them out.
    pub fn ordered<T: DocumentTree + ?Sized>(&self, tree: &T) -> Vec<BlockId> {
        tree.blocks()
            .into_iter()
            .filter(|b| self.tracked.contains(b))
            .collect()
    }

    /// Forget every block. Call alongside disconnecting the signal source.
    pub fn clear(&mut self) {
        self.tracked.clear();
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryDocument;
    use crate::host::ObserverOptions;

    fn connected_doc() -> MemoryDocument {
        let mut doc = MemoryDocument::new();
        doc.connect(&ObserverOptions::with_buffer(100));
        doc
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut doc = connected_doc();
        let id = doc.push_block(vec!["x".into()], 10.0);
        let mut registry = TrackingRegistry::new();

        assert!(registry.register(&mut doc, id));
        assert!(!registry.register(&mut doc, id));
        assert_eq!(doc.counters().observes, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_nested_inserts_registered_once() {
        let mut doc = connected_doc();
        let mut registry = TrackingRegistry::new();
        let single = doc.push_block(vec!["a".into()], 10.0);
        let (group, nested) = doc.push_group(vec![
            (vec!["b".into()], 10.0),
            (vec!["c".into()], 10.0),
        ]);
        let text = doc.push_other();

        let records = vec![
            MutationRecord {
                added: vec![single, group, text],
            },
            // The same block reported again by a later record.
            MutationRecord {
                added: vec![nested[0]],
            },
        ];
        assert_eq!(registry.register_inserted(&mut doc, &records), 3);
        assert_eq!(doc.observed(), &[single, nested[0], nested[1]]);
    }

    #[test]
    fn test_ordered_follows_document() {
        let mut doc = connected_doc();
        let ids = doc.push_blocks(4, 10.0);
        let mut registry = TrackingRegistry::new();
        registry.register(&mut doc, ids[3]);
        registry.register(&mut doc, ids[1]);
        assert_eq!(registry.ordered(&doc), vec![ids[1], ids[3]]);

        registry.clear();
        assert!(registry.is_empty());
    }
}
