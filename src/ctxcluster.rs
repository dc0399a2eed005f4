//! Cluster engine: compresses raw context statistics into a small codebook.
//!
//! The most frequent contexts become cluster centers; every other context is then
//! folded into its nearest center(s) within a Hamming bound. A context equidistant
//! from several centers has its counts split evenly between them with integer
//! division; the remainder is dropped and reported as `split_loss`.

use log::{debug, info, warn};

use crate::ctxiter::DepthFirst;
use crate::ctxnode::NodeId;
use crate::ctxpatch::Patch;
use crate::ctxsearch::find_neighbors;
use crate::ctxstructs::ClusterConfig;
use crate::ctxtree::{ContextTree, LeafStats};
use crate::Result;

/// Result of [`cluster_stats`].
#[derive(Clone, Debug)]
pub struct ClusterOutcome {
    /// Tree whose leaves are the cluster centers
    pub tree: ContextTree,
    /// Number of centers promoted
    pub clusters: usize,
    /// Contexts folded into at least one center
    pub assigned_points: u64,
    /// Contexts with no center within the distance bound
    pub discarded_points: u64,
    /// Occurrences carried by the discarded contexts
    pub discarded_occurrences: u64,
    /// Occurrences lost to integer division when splitting ties
    pub split_loss: u64,
}

/// Builds a cluster tree from `source`, which is left untouched.
pub fn cluster_stats(source: &ContextTree, config: &ClusterConfig) -> Result<ClusterOutcome> {
    let k = source.patch_len();
    let mut working = source.clone();
    let mut centers = match k {
        0 => ContextTree::new(),
        k => ContextTree::with_patch_len(k)?,
    };

    let clusters = promote_centers(&mut working, &mut centers, config)?;
    if clusters == 0 {
        warn!(
            "No context occurs more than {} times; cluster tree is empty",
            config.min_occurrences
        );
    }

    let mut outcome = ClusterOutcome {
        tree: ContextTree::new(),
        clusters,
        assigned_points: 0,
        discarded_points: 0,
        discarded_occurrences: 0,
        split_loss: 0,
    };

    for (leaf, patch) in working.leaves() {
        let stats = working.leaf_stats(leaf)?;
        let mut neighbors = find_neighbors(&centers, &patch, config.max_distance)?;
        if neighbors.is_empty() {
            outcome.discarded_points += 1;
            outcome.discarded_occurrences += stats.occurrences;
            continue;
        }
        let nearest: Vec<NodeId> = neighbors.nearest().iter().map(|n| n.leaf).collect();
        outcome.split_loss += assign_point(&mut centers, &patch, stats, &nearest)?;
        outcome.assigned_points += 1;
    }

    info!(
        "Clustering: {} centers, {} contexts assigned, {} discarded ({} occurrences), {} lost to splits",
        outcome.clusters,
        outcome.assigned_points,
        outcome.discarded_points,
        outcome.discarded_occurrences,
        outcome.split_loss
    );
    outcome.tree = centers;
    Ok(outcome)
}

/// Moves the most frequent qualifying leaves of `working` into `centers`.
fn promote_centers(
    working: &mut ContextTree,
    centers: &mut ContextTree,
    config: &ClusterConfig,
) -> Result<usize> {
    let mut promoted = 0;
    while promoted < config.max_clusters {
        // Removal invalidates any cursor, so every round rescans from the start.
        let Some((leaf, patch, stats)) = most_frequent_leaf(working, config.min_occurrences)? else {
            break;
        };
        let center = centers.insert_counts(&patch, stats.occurrences, stats.ones)?;
        centers.cluster_diff_mut(center)?;
        working.remove_leaf(leaf)?;
        promoted += 1;
        debug!(
            "Cluster {}: {} ({} occurrences, {} ones)",
            promoted, patch, stats.occurrences, stats.ones
        );
    }
    Ok(promoted)
}

/// First leaf (in patch order) with the highest occurrences above `min_occurrences`.
fn most_frequent_leaf(
    tree: &ContextTree,
    min_occurrences: u64,
) -> Result<Option<(NodeId, Patch, LeafStats)>> {
    let mut best: Option<(NodeId, Patch, LeafStats)> = None;
    let mut it = DepthFirst::begin(tree);
    while let Some(leaf) = it.current() {
        let stats = tree.leaf_stats(leaf)?;
        let better = match &best {
            Some((_, _, top)) => stats.occurrences > top.occurrences,
            None => stats.occurrences > min_occurrences,
        };
        if better {
            best = Some((leaf, it.patch().clone(), stats));
        }
        it.advance();
    }
    Ok(best)
}

/// Splits a context's counts across its nearest centers; returns the occurrences
/// dropped by the integer split.
fn assign_point(
    centers: &mut ContextTree,
    patch: &Patch,
    stats: LeafStats,
    nearest: &[NodeId],
) -> Result<u64> {
    let n = nearest.len() as u64;
    let share = stats.occurrences / n;
    let ones_share = stats.ones / n;
    for &center in nearest {
        let center_patch = centers.leaf_patch(center)?;
        centers.add_to_leaf(center, share, ones_share)?;
        let diff = centers.cluster_diff_mut(center)?;
        for (pos, count) in diff.iter_mut().enumerate() {
            if patch.get(pos) == center_patch.get(pos) {
                *count += share;
            }
        }
    }
    Ok(stats.occurrences - share * n)
}
