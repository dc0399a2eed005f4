//! Resumable depth-first enumeration of the leaves of a context tree.
//!
//! The iterator keeps only the current leaf, its depth and a patch buffer. Each
//! step climbs parent links until an ancestor offers an unvisited 1-branch and then
//! descends along the lowest branches again, so leaves come out in ascending
//! binary-patch order and each patch is rebuilt from the `incoming` bits on the way.

use crate::ctxnode::NodeId;
use crate::ctxpatch::Patch;
use crate::ctxtree::ContextTree;

/// Cursor over the leaves of a tree. Holding one borrows the tree, so the tree
/// cannot be mutated until the cursor is dropped.
#[derive(Clone, Debug)]
pub struct DepthFirst<'a> {
    tree: &'a ContextTree,
    current: Option<NodeId>,
    patch: Patch,
    depth: usize,
}

impl<'a> DepthFirst<'a> {
    /// Positions a cursor on the lowest leaf of `tree` (exhausted if it has none).
    pub fn begin(tree: &'a ContextTree) -> Self {
        let mut it = Self {
            tree,
            current: None,
            patch: Patch::zeros(tree.patch_len()),
            depth: 0,
        };
        it.descend(tree.root(), 0);
        it
    }

    /// Current leaf, or `None` once exhausted.
    #[inline]
    pub fn current(&self) -> Option<NodeId> {
        self.current
    }

    /// Patch of the current leaf. Meaningless once exhausted.
    #[inline]
    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    /// True once every leaf has been visited.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }

    /// Moves to the next leaf in ascending patch order.
    pub fn advance(&mut self) {
        let Some(mut id) = self.current else {
            return;
        };
        let mut depth = self.depth;
        loop {
            let Some(node) = self.tree.node(id) else {
                self.current = None;
                return;
            };
            let Some(parent_id) = node.parent else {
                self.current = None;
                return;
            };
            let incoming = node.incoming;
            depth -= 1;
            if !incoming {
                if let Some(sibling) = self.tree.node(parent_id).and_then(|p| p.child(1)) {
                    self.patch.set(depth, true);
                    self.descend(sibling, depth + 1);
                    return;
                }
            }
            id = parent_id;
        }
    }

    /// Follows the lowest existing branch from `id` (at `depth`) down to a leaf.
    fn descend(&mut self, mut id: NodeId, mut depth: usize) {
        loop {
            let Some(node) = self.tree.node(id) else {
                self.current = None;
                return;
            };
            if node.is_leaf() {
                self.current = Some(id);
                self.depth = depth;
                return;
            }
            let next = match (node.child(0), node.child(1)) {
                (Some(child), _) => (child, false),
                (None, Some(child)) => (child, true),
                (None, None) => {
                    self.current = None;
                    return;
                }
            };
            if depth < self.patch.len() {
                self.patch.set(depth, next.1);
            }
            id = next.0;
            depth += 1;
        }
    }
}

impl Iterator for DepthFirst<'_> {
    type Item = (NodeId, Patch);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let patch = self.patch.clone();
        self.advance();
        Some((id, patch))
    }
}

impl ContextTree {
    /// Iterates `(leaf, patch)` pairs in ascending patch order.
    pub fn leaves(&self) -> DepthFirst<'_> {
        DepthFirst::begin(self)
    }
}
