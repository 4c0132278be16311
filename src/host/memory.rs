//! In-memory document host.
//!
//! Models just enough of a scrolling document for the engine: an ordered list
//! of blocks with children, laid-out heights and status flags, grouped
//! subtrees for mutation batches, and an intersection observer that reports
//! state changes as the simulated viewport moves.

use std::collections::{HashMap, HashSet};

use crate::host::{
    BlockId, DocumentTree, NodeId, ObserverOptions, VisibilityEntry, VisibilitySource,
};

/// Host-side state of one block.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryBlock {
    pub id: BlockId,

    /// Rendered children, in order.
    pub children: Vec<String>,

    /// Natural laid-out height (0 = not laid out yet).
    pub height: f64,

    /// Pinned minimum height, set while virtualized.
    pub min_height: Option<f64>,

    pub virtualized: bool,
    pub attached: bool,
    pub streaming: bool,
}

/// Call counters for asserting on host side effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCounters {
    pub connects: usize,
    pub disconnects: usize,
    pub observes: usize,
    pub detaches: usize,
    pub attaches: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Block(BlockId),
    Group(Vec<BlockId>),
    Other,
}

/// An in-memory document implementing [`DocumentTree`] and [`VisibilitySource`].
#[derive(Debug, Default)]
pub struct MemoryDocument {
    scroll_root: bool,

    /// Attached blocks in document order.
    order: Vec<BlockId>,

    /// Every block ever created, including ones replaced by navigation.
    blocks: HashMap<BlockId, MemoryBlock>,

    nodes: HashMap<NodeId, Node>,

    next_id: u64,

    observer: Option<ObserverOptions>,
    observed: Vec<BlockId>,
    observed_set: HashSet<BlockId>,

    /// Last intersection state reported per observed block.
    reported: HashMap<BlockId, bool>,

    counters: HostCounters,
}

impl MemoryDocument {
    /// Create an empty document whose scroll root already exists.
    pub fn new() -> Self {
        Self {
            scroll_root: true,
            ..Default::default()
        }
    }

    /// Create an empty document that has not rendered its scroll root yet.
    pub fn without_scroll_root() -> Self {
        Self::default()
    }

    pub fn set_scroll_root(&mut self, present: bool) {
        self.scroll_root = present;
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn create_block(&mut self, children: Vec<String>, height: f64) -> BlockId {
        let id = self.alloc_id();
        self.blocks.insert(
            id,
            MemoryBlock {
                id,
                children,
                height,
                min_height: None,
                virtualized: false,
                attached: true,
                streaming: false,
            },
        );
        self.nodes.insert(id, Node::Block(id));
        self.order.push(id);
        id
    }

    /// Append a block at the end of the document. Returns its id, which is
    /// also the [`NodeId`] to report in a mutation record.
    pub fn push_block(&mut self, children: Vec<String>, height: f64) -> BlockId {
        self.create_block(children, height)
    }

    /// Append `count` blocks with generated children and a uniform height.
    pub fn push_blocks(&mut self, count: usize, height: f64) -> Vec<BlockId> {
        (0..count)
            .map(|_| {
                let n = self.next_id;
                self.create_block(vec![format!("turn-{n}-header"), format!("turn-{n}-body")], height)
            })
            .collect()
    }

    /// Append a wrapper subtree holding one nested block per entry.
    pub fn push_group(&mut self, items: Vec<(Vec<String>, f64)>) -> (NodeId, Vec<BlockId>) {
        let group = self.alloc_id();
        let ids: Vec<BlockId> = items
            .into_iter()
            .map(|(children, height)| self.create_block(children, height))
            .collect();
        self.nodes.insert(group, Node::Group(ids.clone()));
        (group, ids)
    }

    /// Append a node that contains no blocks (e.g. a text node or toolbar).
    pub fn push_other(&mut self) -> NodeId {
        let id = self.alloc_id();
        self.nodes.insert(id, Node::Other);
        id
    }

    /// Remove a block from the live tree without touching its content.
    pub fn remove_block(&mut self, block: BlockId) {
        self.order.retain(|&b| b != block);
        if let Some(b) = self.blocks.get_mut(&block) {
            b.attached = false;
        }
    }

    /// Replace the whole document, as a navigation to another page would.
    pub fn replace_document(&mut self) {
        for id in std::mem::take(&mut self.order) {
            if let Some(b) = self.blocks.get_mut(&id) {
                b.attached = false;
            }
        }
    }

    pub fn set_streaming(&mut self, block: BlockId, streaming: bool) {
        if let Some(b) = self.blocks.get_mut(&block) {
            b.streaming = streaming;
        }
    }

    pub fn set_height(&mut self, block: BlockId, height: f64) {
        if let Some(b) = self.blocks.get_mut(&block) {
            b.height = height;
        }
    }

    pub fn block(&self, block: BlockId) -> Option<&MemoryBlock> {
        self.blocks.get(&block)
    }

    pub fn observer(&self) -> Option<&ObserverOptions> {
        self.observer.as_ref()
    }

    /// Blocks observed by the current subscription, in observation order.
    pub fn observed(&self) -> &[BlockId] {
        &self.observed
    }

    pub fn counters(&self) -> HostCounters {
        self.counters
    }

    /// Effective rendered height: a virtualized block is held open by its pin.
    fn rendered_height(&self, block: &MemoryBlock) -> f64 {
        match (block.virtualized, block.min_height) {
            (true, Some(pinned)) => pinned,
            _ => block.height,
        }
    }

    /// Move the viewport and collect the intersection changes the observer would
    /// deliver in one batch. Newly observed blocks always report once.
    pub fn scroll_to(&mut self, scroll_top: f64, viewport_height: f64) -> Vec<VisibilityEntry> {
        let Some(options) = self.observer else {
            return Vec::new();
        };
        let margin = options.root_margin;
        let lo = scroll_top - f64::from(margin.top);
        let hi = scroll_top + viewport_height + f64::from(margin.bottom);

        let mut offset = 0.0;
        let mut entries = Vec::new();
        for &id in &self.order {
            let Some(block) = self.blocks.get(&id) else {
                continue;
            };
            let height = self.rendered_height(block);
            let top = offset;
            offset += height;
            if !self.observed_set.contains(&id) {
                continue;
            }
            let intersecting = top < hi && top + height > lo;
            if self.reported.get(&id) != Some(&intersecting) {
                entries.push(VisibilityEntry {
                    block: id,
                    is_intersecting: intersecting,
                });
            }
        }
        for entry in &entries {
            self.reported.insert(entry.block, entry.is_intersecting);
        }
        entries
    }

    /// Total rendered height of the attached document.
    pub fn scroll_height(&self) -> f64 {
        self.order
            .iter()
            .filter_map(|id| self.blocks.get(id))
            .map(|b| self.rendered_height(b))
            .sum()
    }
}

impl DocumentTree for MemoryDocument {
    type Fragment = Vec<String>;

    fn has_scroll_root(&self) -> bool {
        self.scroll_root
    }

    fn blocks(&self) -> Vec<BlockId> {
        self.order.clone()
    }

    fn blocks_in_subtree(&self, node: NodeId) -> Vec<BlockId> {
        match self.nodes.get(&node) {
            Some(Node::Block(id)) => vec![*id],
            Some(Node::Group(ids)) => ids.clone(),
            Some(Node::Other) | None => Vec::new(),
        }
    }

    fn is_attached(&self, block: BlockId) -> bool {
        self.blocks.get(&block).is_some_and(|b| b.attached)
    }

    fn measure_height(&self, block: BlockId) -> f64 {
        match self.blocks.get(&block) {
            Some(b) if b.attached => self.rendered_height(b),
            _ => 0.0,
        }
    }

    fn is_streaming(&self, block: BlockId) -> bool {
        self.blocks.get(&block).is_some_and(|b| b.streaming)
    }

    fn is_virtualized(&self, block: BlockId) -> bool {
        self.blocks.get(&block).is_some_and(|b| b.virtualized)
    }

    fn set_virtualized(&mut self, block: BlockId, virtualized: bool) {
        if let Some(b) = self.blocks.get_mut(&block) {
            b.virtualized = virtualized;
        }
    }

    fn detach_children(&mut self, block: BlockId) -> Vec<String> {
        self.counters.detaches += 1;
        self.blocks
            .get_mut(&block)
            .map(|b| std::mem::take(&mut b.children))
            .unwrap_or_default()
    }

    fn attach_children(&mut self, block: BlockId, fragment: Vec<String>) {
        self.counters.attaches += 1;
        if let Some(b) = self.blocks.get_mut(&block) {
            b.children.extend(fragment);
        }
    }

    fn set_min_height(&mut self, block: BlockId, height: Option<f64>) {
        if let Some(b) = self.blocks.get_mut(&block) {
            b.min_height = height;
        }
    }
}

impl VisibilitySource for MemoryDocument {
    fn connect(&mut self, options: &ObserverOptions) {
        self.counters.connects += 1;
        self.observer = Some(*options);
    }

    fn observe(&mut self, block: BlockId) {
        if self.observer.is_none() {
            return;
        }
        self.counters.observes += 1;
        if self.observed_set.insert(block) {
            self.observed.push(block);
        }
    }

    fn disconnect(&mut self) {
        self.counters.disconnects += 1;
        self.observer = None;
        self.observed.clear();
        self.observed_set.clear();
        self.reported.clear();
    }
}
