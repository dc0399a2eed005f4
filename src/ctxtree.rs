//! The context tree: a binary trie of patches holding per-context center-pixel counts.
//!
//! Inner nodes branch on the next patch sample; the node reached after consuming all
//! `k` samples is a leaf that counts how often that context occurred and how many
//! of those occurrences had a center pixel of 1. Every node's `occurrences` is the
//! sum over the leaves beneath it, maintained on every mutation.
//!
//! The tree is single-owner: mutation takes `&mut self`, while traversals
//! ([`crate::ctxiter::DepthFirst`], [`crate::ctxsearch::find_neighbors`]) borrow it
//! shared, so structural changes during a live traversal do not compile.

use std::io::{self, Write};

#[cfg(feature = "trace_tree")]
use tracing::trace;

#[cfg(not(feature = "trace_tree"))]
#[macro_use]
mod trace_stubs {
    macro_rules! trace {
        ($($arg:tt)*) => { std::convert::identity(format_args!($($arg)*)) };
    }
}

#[cfg(not(feature = "trace_tree"))]
use trace_stubs::*;

use crate::ctxiter::DepthFirst;
use crate::ctxnode::{Node, NodeArena, NodeId, NodeKind};
use crate::ctxpatch::{Patch, MAX_PATCH_LEN};
use crate::{CtxError, Result};

/// Counts stored at a leaf.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LeafStats {
    /// Times the context was observed
    pub occurrences: u64,
    /// Times the center pixel was 1 in that context
    pub ones: u64,
}

impl LeafStats {
    /// Times the center pixel was 0.
    #[inline]
    pub fn zeros(&self) -> u64 {
        self.occurrences - self.ones
    }
}

/// Aggregates over every leaf of a tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeSummary {
    /// Number of distinct contexts
    pub leaves: u64,
    /// Sum of occurrences over all leaves
    pub occurrences: u64,
    /// Sum of ones counts over all leaves
    pub ones: u64,
    /// Number of nodes, root included
    pub nodes: u64,
}

/// Binary trie of patch statistics.
#[derive(Clone, Debug)]
pub struct ContextTree {
    arena: NodeArena,
    root: NodeId,
    k: usize,
}

impl Default for ContextTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextTree {
    /// Creates an empty tree whose patch length is fixed by the first insert.
    pub fn new() -> Self {
        let mut arena = NodeArena::new();
        let root = arena.alloc(Node::inner(None, false));
        Self { arena, root, k: 0 }
    }

    /// Creates an empty tree for patches of length `k`.
    pub fn with_patch_len(k: usize) -> Result<Self> {
        validate_patch_len(k)?;
        let mut tree = Self::new();
        tree.k = k;
        Ok(tree)
    }

    /// Patch length of the stored contexts, or 0 while it is not yet fixed.
    #[inline]
    pub fn patch_len(&self) -> usize {
        self.k
    }

    /// Root handle; the root is always an inner node.
    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Node behind a handle, if it is still live.
    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id)
    }

    #[inline]
    pub(crate) fn node_ref(&self, id: NodeId) -> Result<&Node> {
        self.arena.get(id).ok_or(CtxError::StaleNode)
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.arena.get_mut(id).ok_or(CtxError::StaleNode)
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// True when no context has been stored.
    pub fn is_empty(&self) -> bool {
        self.arena
            .get(self.root)
            .map_or(true, |root| root.children() == [None, None])
    }

    pub(crate) fn set_patch_len(&mut self, k: usize) -> Result<()> {
        validate_patch_len(k)?;
        self.k = k;
        Ok(())
    }

    /// Checks `patch` against the tree's k, fixing k on first use.
    fn accept_patch(&mut self, patch: &Patch) -> Result<()> {
        if self.k == 0 {
            validate_patch_len(patch.len())?;
            self.k = patch.len();
            return Ok(());
        }
        self.check_patch(patch)
    }

    pub(crate) fn check_patch(&self, patch: &Patch) -> Result<()> {
        if patch.len() != self.k {
            return Err(CtxError::PatchLengthMismatch {
                expected: self.k,
                actual: patch.len(),
            });
        }
        Ok(())
    }

    /// Records one occurrence of `patch` with the given center pixel.
    pub fn insert(&mut self, patch: &Patch, center: bool) -> Result<NodeId> {
        self.insert_counts(patch, 1, center as u64)
    }

    /// Adds `occurrences` observations of `patch`, `ones` of them with a 1 center.
    pub fn insert_counts(&mut self, patch: &Patch, occurrences: u64, ones: u64) -> Result<NodeId> {
        if ones > occurrences {
            return Err(CtxError::Malformed {
                message: format!("ones count {} exceeds occurrences {}", ones, occurrences),
            });
        }
        self.accept_patch(patch)?;
        let k = self.k;
        let mut current = self.root;
        for depth in 0..k {
            let slot = patch.slot(depth);
            let node = self.node_mut(current)?;
            node.occurrences += occurrences;
            let existing = node.child(slot);
            current = match existing {
                Some(child) => child,
                None => {
                    let child = if depth + 1 < k {
                        Node::inner(Some(current), slot == 1)
                    } else {
                        Node::leaf(Some(current), slot == 1)
                    };
                    let child_id = self.arena.alloc(child);
                    if let NodeKind::Inner { children } = &mut self.node_mut(current)?.kind {
                        children[slot] = Some(child_id);
                    }
                    trace!("new node at depth {} under bit {}", depth + 1, slot);
                    child_id
                }
            };
        }
        let leaf = self.node_mut(current)?;
        leaf.occurrences += occurrences;
        match &mut leaf.kind {
            NodeKind::Leaf { ones: count, .. } => *count += ones,
            NodeKind::Inner { .. } => {
                return Err(CtxError::Malformed {
                    message: format!("inner node found at leaf depth {}", k),
                })
            }
        }
        Ok(current)
    }

    /// Finds the leaf of `patch` without creating anything.
    pub fn find_leaf(&self, patch: &Patch) -> Result<NodeId> {
        if self.k == 0 {
            return Err(CtxError::NotFound);
        }
        self.check_patch(patch)?;
        let mut current = self.root;
        for depth in 0..self.k {
            current = self
                .node_ref(current)?
                .child(patch.slot(depth))
                .ok_or(CtxError::NotFound)?;
        }
        trace!("lookup hit {}", patch);
        Ok(current)
    }

    /// Counts of a previously observed context; [`CtxError::NotFound`] otherwise.
    pub fn lookup(&self, patch: &Patch) -> Result<LeafStats> {
        let leaf = self.find_leaf(patch)?;
        self.leaf_stats(leaf)
    }

    /// Counts of the leaf behind `id`.
    pub fn leaf_stats(&self, id: NodeId) -> Result<LeafStats> {
        let node = self.node_ref(id)?;
        match node.kind {
            NodeKind::Leaf { ones, .. } => Ok(LeafStats {
                occurrences: node.occurrences,
                ones,
            }),
            NodeKind::Inner { .. } => Err(CtxError::StaleNode),
        }
    }

    /// Rebuilds the patch of a leaf by walking the parent chain.
    pub fn leaf_patch(&self, id: NodeId) -> Result<Patch> {
        let mut patch = Patch::zeros(self.k);
        self.fill_leaf_patch(id, &mut patch)?;
        Ok(patch)
    }

    /// Like [`Self::leaf_patch`], reusing the caller's buffer.
    pub fn fill_leaf_patch(&self, id: NodeId, patch: &mut Patch) -> Result<()> {
        if !self.node_ref(id)?.is_leaf() {
            return Err(CtxError::StaleNode);
        }
        patch.resize(self.k);
        let mut depth = self.k;
        let mut current = id;
        while let Some(parent) = self.node_ref(current)?.parent {
            if depth == 0 {
                return Err(CtxError::Malformed {
                    message: "leaf deeper than the patch length".to_string(),
                });
            }
            depth -= 1;
            patch.set(depth, self.node_ref(current)?.incoming);
            current = parent;
        }
        if depth != 0 {
            return Err(CtxError::Malformed {
                message: format!("leaf at depth {} in a tree with k={}", self.k - depth, self.k),
            });
        }
        Ok(())
    }

    /// Releases every node; the tree is left empty with its patch length unset.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = self.arena.alloc(Node::inner(None, false));
        self.k = 0;
    }

    /// Unions `src` into this tree, adding the counts of shared contexts.
    pub fn merge_into(&mut self, src: &ContextTree) -> Result<()> {
        if src.k == 0 || src.is_empty() {
            return Ok(());
        }
        if self.k == 0 {
            self.set_patch_len(src.k)?;
        } else if self.k != src.k {
            return Err(CtxError::PatchLengthMismatch {
                expected: self.k,
                actual: src.k,
            });
        }
        self.merge_node(self.root, src, src.root)
    }

    /// Returns a fresh tree holding the union of this tree and `src`.
    pub fn merged(&self, src: &ContextTree) -> Result<ContextTree> {
        let mut out = self.clone();
        out.merge_into(src)?;
        Ok(out)
    }

    fn merge_node(&mut self, dest: NodeId, src: &ContextTree, src_id: NodeId) -> Result<()> {
        let src_node = src.node_ref(src_id)?;
        let src_children = src_node.children();
        let src_ones = src_node.ones();
        let node = self.node_mut(dest)?;
        node.occurrences += src_node.occurrences;
        let dest_children = match &mut node.kind {
            NodeKind::Leaf { ones, .. } => {
                *ones += src_ones;
                return Ok(());
            }
            NodeKind::Inner { children } => *children,
        };
        for slot in 0..2 {
            let Some(src_child) = src_children[slot] else {
                continue;
            };
            match dest_children[slot] {
                Some(dest_child) => self.merge_node(dest_child, src, src_child)?,
                None => {
                    let copied = self.copy_subtree(src, src_child, dest, slot == 1)?;
                    if let NodeKind::Inner { children } = &mut self.node_mut(dest)?.kind {
                        children[slot] = Some(copied);
                    }
                }
            }
        }
        Ok(())
    }

    /// Deep-copies the subtree of `src` rooted at `src_id`, hanging it under `parent`.
    fn copy_subtree(
        &mut self,
        src: &ContextTree,
        src_id: NodeId,
        parent: NodeId,
        incoming: bool,
    ) -> Result<NodeId> {
        let src_node = src.node_ref(src_id)?;
        let mut node = match &src_node.kind {
            NodeKind::Leaf { ones, .. } => {
                let mut leaf = Node::leaf(Some(parent), incoming);
                if let NodeKind::Leaf { ones: count, .. } = &mut leaf.kind {
                    *count = *ones;
                }
                leaf
            }
            NodeKind::Inner { .. } => Node::inner(Some(parent), incoming),
        };
        node.occurrences = src_node.occurrences;
        let children = src_node.children();
        let id = self.arena.alloc(node);
        for (slot, child) in children.iter().enumerate() {
            if let Some(src_child) = child {
                let copied = self.copy_subtree(src, *src_child, id, slot == 1)?;
                if let NodeKind::Inner { children } = &mut self.node_mut(id)?.kind {
                    children[slot] = Some(copied);
                }
            }
        }
        Ok(id)
    }

    /// Walks the whole tree once, accumulating leaf aggregates.
    pub fn summary(&self) -> TreeSummary {
        let mut summary = TreeSummary::default();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.arena.get(id) else {
                continue;
            };
            summary.nodes += 1;
            match &node.kind {
                NodeKind::Leaf { ones, .. } => {
                    summary.leaves += 1;
                    summary.occurrences += node.occurrences;
                    summary.ones += ones;
                }
                NodeKind::Inner { children } => {
                    stack.extend(children.iter().rev().flatten());
                }
            }
        }
        summary
    }

    /// Removes a leaf, subtracting its counts from every ancestor and pruning
    /// ancestors left without children (the root is never removed).
    pub fn remove_leaf(&mut self, id: NodeId) -> Result<LeafStats> {
        let stats = self.leaf_stats(id)?;
        let removed = self.arena.release(id)?;
        let mut parent = removed.parent;
        let mut incoming = removed.incoming;
        let mut pruning = true;
        while let Some(pid) = parent {
            let (childless, grandparent, parent_incoming) = {
                let node = self.node_mut(pid)?;
                node.occurrences = node.occurrences.saturating_sub(stats.occurrences);
                if pruning {
                    if let NodeKind::Inner { children } = &mut node.kind {
                        children[incoming as usize] = None;
                    }
                }
                (node.children() == [None, None], node.parent, node.incoming)
            };
            if pruning && childless && pid != self.root {
                self.arena.release(pid)?;
            } else {
                pruning = false;
            }
            parent = grandparent;
            incoming = parent_incoming;
        }
        Ok(stats)
    }

    /// Adds counts to an existing leaf and all of its ancestors.
    pub fn add_to_leaf(&mut self, id: NodeId, occurrences: u64, ones: u64) -> Result<()> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Leaf { ones: count, .. } => *count += ones,
            NodeKind::Inner { .. } => return Err(CtxError::StaleNode),
        }
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node_mut(node_id)?;
            node.occurrences += occurrences;
            current = node.parent;
        }
        Ok(())
    }

    /// Cluster agreement counts of a leaf, if it has any.
    pub fn cluster_diff(&self, id: NodeId) -> Result<Option<&[u64]>> {
        Ok(self.node_ref(id)?.cluster_diff())
    }

    /// Mutable access to a leaf's cluster agreement counts, creating a zeroed
    /// array of length k on first use.
    pub fn cluster_diff_mut(&mut self, id: NodeId) -> Result<&mut Vec<u64>> {
        let k = self.k;
        match &mut self.node_mut(id)?.kind {
            NodeKind::Leaf { cluster_diff, .. } => {
                Ok(cluster_diff.get_or_insert_with(|| vec![0; k]))
            }
            NodeKind::Inner { .. } => Err(CtxError::StaleNode),
        }
    }

    /// Prints every context with its counts, in ascending patch order.
    pub fn write_dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let mut it = DepthFirst::begin(self);
        while let Some(leaf) = it.current() {
            if let Some(node) = self.arena.get(leaf) {
                write!(out, "{} ({})", it.patch(), node.occurrences)?;
                write!(out, " ones={}", node.ones())?;
                if let Some(diff) = node.cluster_diff() {
                    write!(out, " diff={:?}", diff)?;
                }
                writeln!(out)?;
            }
            it.advance();
        }
        Ok(())
    }

    /// Assembles a tree from nodes decoded elsewhere.
    pub(crate) fn from_parts(arena: NodeArena, root: NodeId, k: usize) -> Self {
        Self { arena, root, k }
    }
}

fn validate_patch_len(k: usize) -> Result<()> {
    if k == 0 || k > MAX_PATCH_LEN {
        return Err(CtxError::InvalidPatchLength {
            len: k,
            max: MAX_PATCH_LEN,
        });
    }
    Ok(())
}
