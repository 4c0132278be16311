//! Host environment capabilities consumed by the engine.
//!
//! The engine never owns the document. It reads and mutates blocks through
//! [`DocumentTree`], subscribes them to viewport-intersection signals through
//! [`VisibilitySource`], and reports counts to a [`StatsSink`].
//!
//! - [`memory`]: in-memory document used by tests and the simulation driver

pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable per-block token supplied by the host.
pub type BlockId = u64;

/// Handle to an arbitrary node of the host tree (used for inserted subtrees).
pub type NodeId = u64;

/// One entry of a visibility batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityEntry {
    pub block: BlockId,
    pub is_intersecting: bool,
}

impl VisibilityEntry {
    pub fn visible(block: BlockId) -> Self {
        Self {
            block,
            is_intersecting: true,
        }
    }

    pub fn hidden(block: BlockId) -> Self {
        Self {
            block,
            is_intersecting: false,
        }
    }
}

/// One tree-mutation notification: the subtrees added under the watched root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationRecord {
    pub added: Vec<NodeId>,
}

/// Margins that expand the observation root, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RootMargin {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl RootMargin {
    /// Vertical-only buffer: `distance` above and below the viewport.
    pub fn vertical(distance: u32) -> Self {
        Self {
            top: distance,
            right: 0,
            bottom: distance,
            left: 0,
        }
    }
}

impl fmt::Display for RootMargin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}px {}px {}px {}px",
            self.top, self.right, self.bottom, self.left
        )
    }
}

/// Parameters of a visibility subscription.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverOptions {
    pub root_margin: RootMargin,

    /// Fraction of the target that must be inside the expanded root.
    pub threshold: f64,
}

impl ObserverOptions {
    pub fn with_buffer(distance: u32) -> Self {
        Self {
            root_margin: RootMargin::vertical(distance),
            threshold: 0.0,
        }
    }
}

/// Read/write access to the blocks of the host tree.
pub trait DocumentTree {
    /// Detached content of a block while it is virtualized.
    type Fragment;

    /// Whether the scroll/viewport root element exists yet.
    fn has_scroll_root(&self) -> bool;

    /// All blocks matching the tracked predicate, in document order.
    fn blocks(&self) -> Vec<BlockId>;

    /// The node itself if it is a block, followed by every block nested inside it.
    fn blocks_in_subtree(&self, node: NodeId) -> Vec<BlockId>;

    fn is_attached(&self, block: BlockId) -> bool;

    /// Laid-out height in pixels; 0 means not laid out yet.
    fn measure_height(&self, block: BlockId) -> f64;

    /// Whether the block's content is still being streamed in.
    fn is_streaming(&self, block: BlockId) -> bool;

    fn is_virtualized(&self, block: BlockId) -> bool;

    fn set_virtualized(&mut self, block: BlockId, virtualized: bool);

    /// Move every child of `block` out of the tree, preserving order.
    fn detach_children(&mut self, block: BlockId) -> Self::Fragment;

    /// Append previously detached children back into `block`.
    fn attach_children(&mut self, block: BlockId, fragment: Self::Fragment);

    /// Pin (or clear, with `None`) the block's minimum height.
    fn set_min_height(&mut self, block: BlockId, height: Option<f64>);
}

/// Delivers batched intersection events for observed blocks.
///
/// Batches are pushed back into the engine by the host integration; this
/// trait only manages the subscription.
pub trait VisibilitySource {
    fn connect(&mut self, options: &ObserverOptions);

    fn observe(&mut self, block: BlockId);

    fn disconnect(&mut self);
}

/// Everything the engine needs from its host.
pub trait Host: DocumentTree + VisibilitySource {}

impl<T: DocumentTree + VisibilitySource> Host for T {}

/// A point-in-time count of virtualized versus tracked blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub virtualized: usize,
    pub total: usize,
}

impl StatsSnapshot {
    /// Virtualized fraction (0.0 - 1.0).
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.virtualized as f64 / self.total as f64
    }

    /// Virtualized share as a rounded whole percentage.
    pub fn percent(&self) -> u32 {
        (self.ratio() * 100.0).round() as u32
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} virtualized ({}%)",
            self.virtualized,
            self.total,
            self.percent()
        )
    }
}

/// Receives debounced stats snapshots.
pub trait StatsSink {
    fn publish(&mut self, snapshot: StatsSnapshot);
}

impl StatsSink for Vec<StatsSnapshot> {
    fn publish(&mut self, snapshot: StatsSnapshot) {
        self.push(snapshot);
    }
}

impl StatsSink for tokio::sync::watch::Sender<StatsSnapshot> {
    fn publish(&mut self, snapshot: StatsSnapshot) {
        self.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_margin_css() {
        let opts = ObserverOptions::with_buffer(2000);
        assert_eq!(opts.root_margin.to_string(), "2000px 0px 2000px 0px");
        assert_eq!(opts.threshold, 0.0);
    }

    #[test]
    fn test_snapshot_percent() {
        let empty = StatsSnapshot::default();
        assert_eq!(empty.percent(), 0);

        let snap = StatsSnapshot {
            virtualized: 2,
            total: 3,
        };
        assert_eq!(snap.percent(), 67);
        assert_eq!(snap.to_string(), "2/3 virtualized (67%)");
    }
}
