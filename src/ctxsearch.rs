//! Hamming-bounded neighbor search over a context tree.
//!
//! The trie doubles as a Hamming-ball search structure: walking it from the root,
//! every branch that disagrees with the query sample costs one unit of distance, and
//! a branch is abandoned as soon as the accumulated cost exceeds the bound. Cost is
//! exponential in the bound, which stays a small constant in practice.

use std::slice;

use crate::ctxnode::NodeId;
use crate::ctxpatch::Patch;
use crate::ctxtree::ContextTree;
use crate::Result;

/// A leaf found by [`find_neighbors`] and its Hamming distance to the query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Neighbor {
    /// Leaf handle in the searched tree
    pub leaf: NodeId,
    /// Hamming distance between the leaf's patch and the query
    pub distance: usize,
}

/// Result of a neighbor search, owned by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NeighborList {
    entries: Vec<Neighbor>,
}

impl NeighborList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&mut self, leaf: NodeId, distance: usize) {
        self.entries.push(Neighbor { leaf, distance });
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was found.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in their current order.
    pub fn as_slice(&self) -> &[Neighbor] {
        &self.entries
    }

    /// Iterates the entries in their current order.
    pub fn iter(&self) -> slice::Iter<'_, Neighbor> {
        self.entries.iter()
    }

    /// Sorts by ascending distance, keeping discovery order among equal distances.
    pub fn sort_by_distance(&mut self) {
        self.entries.sort_by_key(|n| n.distance);
    }

    /// Smallest distance in the list.
    pub fn min_distance(&self) -> Option<usize> {
        self.entries.iter().map(|n| n.distance).min()
    }

    /// Sorts the list and returns the group of entries tied at the minimum distance.
    pub fn nearest(&mut self) -> &[Neighbor] {
        self.sort_by_distance();
        let Some(first) = self.entries.first() else {
            return &[];
        };
        let min = first.distance;
        let count = self.entries.iter().take_while(|n| n.distance == min).count();
        &self.entries[..count]
    }
}

impl IntoIterator for NeighborList {
    type Item = Neighbor;
    type IntoIter = std::vec::IntoIter<Neighbor>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a NeighborList {
    type Item = &'a Neighbor;
    type IntoIter = slice::Iter<'a, Neighbor>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Lists every leaf within `max_distance` of `center`, excluding an exact match.
///
/// Entries come out in trie order; call [`NeighborList::sort_by_distance`] before
/// relying on closest-first order. An exact match (distance 0) is never reported;
/// use [`ContextTree::lookup`] for that.
pub fn find_neighbors(tree: &ContextTree, center: &Patch, max_distance: usize) -> Result<NeighborList> {
    let mut found = NeighborList::new();
    if tree.patch_len() == 0 {
        return Ok(found);
    }
    tree.check_patch(center)?;

    // (node, depth, accumulated distance)
    let mut stack = vec![(tree.root(), 0usize, 0usize)];
    while let Some((id, depth, distance)) = stack.pop() {
        let node = tree.node_ref(id)?;
        if node.is_leaf() {
            if distance > 0 {
                found.push(id, distance);
            }
            continue;
        }
        let wanted = center.slot(depth);
        for slot in (0..2).rev() {
            let Some(child) = node.child(slot) else {
                continue;
            };
            let child_distance = distance + usize::from(slot != wanted);
            if child_distance <= max_distance {
                stack.push((child, depth + 1, child_distance));
            }
        }
    }
    Ok(found)
}
