//! Common utility functions for integration tests
#![allow(dead_code)]

use ctxden::ctximage::BitImage;
use ctxden::{ContextTree, NodeId, Patch};
use rand::rngs::StdRng;
use rand::Rng;

/// Patch from a `"0101"` string.
pub fn p(bits: &str) -> Patch {
    bits.parse().expect("valid patch literal")
}

/// Tree built by inserting each `(patch, center)` observation in order.
pub fn tree_from(observations: &[(&str, bool)]) -> ContextTree {
    let mut tree = ContextTree::new();
    for (bits, center) in observations {
        tree.insert(&p(bits), *center).expect("insert");
    }
    tree
}

/// Tree built from `(patch, occurrences, ones)` triples.
pub fn tree_with_counts(entries: &[(&str, u64, u64)]) -> ContextTree {
    let mut tree = ContextTree::new();
    for (bits, occ, ones) in entries {
        tree.insert_counts(&p(bits), *occ, *ones).expect("insert_counts");
    }
    tree
}

/// Every leaf as `(patch string, occurrences, ones)`, in iterator order.
pub fn leaf_list(tree: &ContextTree) -> Vec<(String, u64, u64)> {
    tree.leaves()
        .map(|(leaf, patch)| {
            let stats = tree.leaf_stats(leaf).expect("live leaf");
            (patch.to_string(), stats.occurrences, stats.ones)
        })
        .collect()
}

/// Brute-force reference for neighbor search: scans every leaf and compares
/// patches directly. Returns `(patch string, distance)` sorted by patch.
pub fn brute_neighbors(tree: &ContextTree, center: &Patch, max_distance: usize) -> Vec<(String, usize)> {
    let mut out: Vec<(String, usize)> = tree
        .leaves()
        .map(|(_, patch)| (patch.to_string(), patch.hamming(center)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .collect();
    out.sort();
    out
}

/// Patch string of a leaf handle.
pub fn patch_of(tree: &ContextTree, leaf: NodeId) -> String {
    tree.leaf_patch(leaf).expect("live leaf").to_string()
}

/// Uniformly random patch of length `k`.
pub fn random_patch(rng: &mut StdRng, k: usize) -> Patch {
    let samples: Vec<bool> = (0..k).map(|_| rng.random()).collect();
    Patch::from_bools(&samples)
}

/// Image from rows of `0`/`1` characters.
pub fn img_from_strings(rows: &[&str]) -> BitImage {
    let h = rows.len();
    let w = rows[0].len();
    let mut img = BitImage::new(w as u32, h as u32).unwrap();
    for (y, row) in rows.iter().enumerate() {
        for (x, ch) in row.chars().enumerate() {
            if ch == '1' {
                img.set_pixel(y as i64, x as i64, true);
            }
        }
    }
    img
}

/// A 32x32 image of horizontal stripes, four rows of 1s then four rows of 0s.
pub fn striped_image() -> BitImage {
    let mut img = BitImage::new(32, 32).unwrap();
    for y in 0..32i64 {
        if (y / 4) % 2 == 0 {
            for x in 0..32i64 {
                img.set_pixel(y, x, true);
            }
        }
    }
    img
}
