//! Context nodes and the slot arena that owns them.
//!
//! Every node of a context tree lives in a slot of a [`NodeArena`] and is addressed
//! by a [`NodeId`]. A node stores the handle of its parent and the bit it hangs
//! under, which is all that is needed to rebuild a leaf's patch without storing it.
//! Freed slots are recycled; each slot carries a generation counter so that a
//! handle held across a removal is detected as stale instead of aliasing the
//! slot's next occupant.

use crate::{CtxError, Result};

/// Handle to a node in a context tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Slot index inside the arena.
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// Payload of a node: either a branch or a fully consumed context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Branch node with one slot per bit value
    Inner { children: [Option<NodeId>; 2] },
    /// Context reached after consuming all `k` samples
    Leaf {
        /// Number of occurrences whose center pixel was 1
        ones: u64,
        /// Per-position agreement counts, present only on cluster centers
        cluster_diff: Option<Vec<u64>>,
    },
}

/// A trie node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    /// Owning node; `None` only for the root
    pub parent: Option<NodeId>,
    /// Branch this node hangs under in its parent
    pub incoming: bool,
    /// Sum of the occurrences of every leaf below (or at) this node
    pub occurrences: u64,
    /// Inner / leaf payload
    pub kind: NodeKind,
}

impl Node {
    /// Creates an empty inner node.
    pub fn inner(parent: Option<NodeId>, incoming: bool) -> Self {
        Self {
            parent,
            incoming,
            occurrences: 0,
            kind: NodeKind::Inner {
                children: [None, None],
            },
        }
    }

    /// Creates an empty leaf.
    pub fn leaf(parent: Option<NodeId>, incoming: bool) -> Self {
        Self {
            parent,
            incoming,
            occurrences: 0,
            kind: NodeKind::Leaf {
                ones: 0,
                cluster_diff: None,
            },
        }
    }

    /// True for leaves.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    /// Child in `slot` (0 or 1); always `None` for leaves.
    #[inline]
    pub fn child(&self, slot: usize) -> Option<NodeId> {
        match &self.kind {
            NodeKind::Inner { children } => children[slot],
            NodeKind::Leaf { .. } => None,
        }
    }

    /// Both child slots; `[None, None]` for leaves.
    #[inline]
    pub fn children(&self) -> [Option<NodeId>; 2] {
        match &self.kind {
            NodeKind::Inner { children } => *children,
            NodeKind::Leaf { .. } => [None, None],
        }
    }

    /// Ones count of a leaf, 0 for inner nodes.
    #[inline]
    pub fn ones(&self) -> u64 {
        match &self.kind {
            NodeKind::Leaf { ones, .. } => *ones,
            NodeKind::Inner { .. } => 0,
        }
    }

    /// Cluster agreement counts, if this leaf is a cluster center.
    pub fn cluster_diff(&self) -> Option<&[u64]> {
        match &self.kind {
            NodeKind::Leaf {
                cluster_diff: Some(diff),
                ..
            } => Some(diff),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Slot storage for the nodes of one tree.
#[derive(Clone, Debug, Default)]
pub struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl NodeArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// True when no node is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Stores `node`, reusing a freed slot when one is available.
    pub fn alloc(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.slots.len()).expect("node arena exceeds u32 slots");
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Releases the node behind `id`, bumping the slot generation.
    pub fn release(&mut self, id: NodeId) -> Result<Node> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .ok_or(CtxError::StaleNode)?;
        let node = slot.node.take().ok_or(CtxError::StaleNode)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(node)
    }

    /// Looks up a live node.
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    /// Looks up a live node mutably.
    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    /// Drops every node. Slots are kept (and their generations bumped) so that
    /// handles taken before the clear stay stale.
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            if slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(index as u32);
        }
        self.live = 0;
    }
}
