// Integration tests for the statistics file format
mod common;

use byteorder::{LittleEndian, WriteBytesExt};
use common::{leaf_list, p, random_patch, tree_with_counts};
use ctxden::{load_stats, read_tree, save_stats, write_tree, ContextTree, CtxError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Cursor;

fn to_bytes(tree: &ContextTree) -> Vec<u8> {
    let mut out = Vec::new();
    write_tree(tree, &mut out).unwrap();
    out
}

fn leaf_bytes(out: &mut Vec<u8>, occurrences: u64, ones: u64) {
    out.push(1);
    out.write_u64::<LittleEndian>(occurrences).unwrap();
    out.write_u64::<LittleEndian>(ones).unwrap();
}

#[test]
fn byte_layout_of_a_single_leaf_tree() {
    let tree = tree_with_counts(&[("1", 2, 1)]);
    let bytes = to_bytes(&tree);

    let mut expected = vec![0, 0, 1];
    leaf_bytes(&mut expected, 2, 1);
    assert_eq!(bytes, expected);
}

#[test]
fn empty_tree_round_trip() {
    let bytes = to_bytes(&ContextTree::new());
    assert_eq!(bytes, vec![0, 0, 0]);
    let loaded = read_tree(&mut Cursor::new(&bytes)).unwrap();
    assert!(loaded.is_empty());
    assert_eq!(loaded.patch_len(), 0);
}

#[test]
fn random_tree_round_trip() {
    let mut rng = StdRng::seed_from_u64(2024);
    for k in [1usize, 5, 17, 64] {
        let mut tree = ContextTree::with_patch_len(k).unwrap();
        for _ in 0..300 {
            let patch = random_patch(&mut rng, k);
            let occurrences = rng.random_range(1..50u64);
            let ones = rng.random_range(0..=occurrences);
            tree.insert_counts(&patch, occurrences, ones).unwrap();
        }

        let bytes = to_bytes(&tree);
        let loaded = read_tree(&mut Cursor::new(&bytes)).unwrap();

        assert_eq!(loaded.patch_len(), k);
        assert_eq!(loaded.summary(), tree.summary());
        assert_eq!(loaded.node_count(), tree.node_count());
        assert_eq!(leaf_list(&loaded), leaf_list(&tree));
        assert_eq!(
            loaded.node(loaded.root()).unwrap().occurrences,
            tree.node(tree.root()).unwrap().occurrences
        );
        // re-serializing gives the same bytes
        assert_eq!(to_bytes(&loaded), bytes);
    }
}

#[test]
fn every_truncation_is_reported() {
    let tree = tree_with_counts(&[("010", 3, 1), ("011", 1, 0), ("110", 9, 9)]);
    let bytes = to_bytes(&tree);
    for len in 0..bytes.len() {
        match read_tree(&mut Cursor::new(&bytes[..len])) {
            Err(CtxError::Truncated { .. }) => {}
            other => panic!("prefix of {} bytes: expected Truncated, got {:?}", len, other.map(|t| t.summary())),
        }
    }
}

#[test]
fn malformed_streams_are_rejected() {
    // flag byte outside {0, 1}
    assert!(matches!(read_tree(&mut Cursor::new(vec![2u8])), Err(CtxError::Malformed { .. })));

    // the root cannot be a leaf
    let mut root_leaf = Vec::new();
    leaf_bytes(&mut root_leaf, 1, 0);
    assert!(matches!(read_tree(&mut Cursor::new(root_leaf)), Err(CtxError::Malformed { .. })));

    // leaves at depths 1 and 2
    let mut uneven = vec![0, 1];
    leaf_bytes(&mut uneven, 1, 0);
    uneven.extend([1, 0, 1]);
    leaf_bytes(&mut uneven, 1, 0);
    uneven.push(0);
    assert!(matches!(read_tree(&mut Cursor::new(uneven)), Err(CtxError::Malformed { .. })));

    // more ones than occurrences
    let mut too_many_ones = vec![0, 1];
    leaf_bytes(&mut too_many_ones, 1, 2);
    too_many_ones.push(0);
    assert!(matches!(read_tree(&mut Cursor::new(too_many_ones)), Err(CtxError::Malformed { .. })));

    // an inner node with no children below the root
    let dangling = vec![0, 1, 0, 0, 0, 0];
    assert!(matches!(read_tree(&mut Cursor::new(dangling)), Err(CtxError::Malformed { .. })));
}

#[test]
fn file_round_trip_and_trailing_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.bin");
    let tree = tree_with_counts(&[("0110", 12, 4), ("1111", 3, 3)]);

    save_stats(&path, &tree).unwrap();
    let loaded = load_stats(&path).unwrap();
    assert_eq!(leaf_list(&loaded), leaf_list(&tree));
    assert_eq!(loaded.lookup(&p("0110")).unwrap().occurrences, 12);

    let mut bytes = std::fs::read(&path).unwrap();
    bytes.push(0);
    std::fs::write(&path, &bytes).unwrap();
    assert!(matches!(load_stats(&path), Err(CtxError::Malformed { .. })));

    assert!(matches!(
        load_stats(dir.path().join("missing.bin")),
        Err(CtxError::Io { .. })
    ));
}

#[test]
fn streams_hold_consecutive_trees() {
    let first = tree_with_counts(&[("01", 1, 1)]);
    let second = tree_with_counts(&[("110", 2, 0)]);
    let mut bytes = to_bytes(&first);
    bytes.extend(to_bytes(&second));

    let mut cursor = Cursor::new(bytes);
    let a = read_tree(&mut cursor).unwrap();
    let b = read_tree(&mut cursor).unwrap();
    assert_eq!(leaf_list(&a), leaf_list(&first));
    assert_eq!(leaf_list(&b), leaf_list(&second));
}

#[test]
fn cluster_annotations_are_not_serialized() {
    let mut tree = tree_with_counts(&[("10", 5, 2)]);
    let leaf = tree.find_leaf(&p("10")).unwrap();
    tree.cluster_diff_mut(leaf).unwrap()[0] = 7;

    let loaded = read_tree(&mut Cursor::new(to_bytes(&tree))).unwrap();
    let leaf = loaded.find_leaf(&p("10")).unwrap();
    assert_eq!(loaded.cluster_diff(leaf).unwrap(), None);
    assert_eq!(to_bytes(&loaded), to_bytes(&tree));
}
