// Cluster engine
mod common;

use common::{leaf_list, p, random_patch, tree_with_counts};
use ctxden::{cluster_stats, ClusterConfig, ContextTree, LeafStats};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn config(max_distance: usize, min_occurrences: u64, max_clusters: usize) -> ClusterConfig {
    ClusterConfig {
        max_distance,
        min_occurrences,
        max_clusters,
    }
}

#[test]
fn assigns_points_to_nearest_centers() {
    let source = tree_with_counts(&[
        ("0000", 200, 50),
        ("1111", 150, 150),
        ("0001", 10, 2),
        ("0011", 5, 3),
        ("1110", 8, 8),
    ]);
    let outcome = cluster_stats(&source, &config(2, 100, 10)).unwrap();
    let centers = &outcome.tree;

    assert_eq!(outcome.clusters, 2);
    assert_eq!(outcome.assigned_points, 3);
    assert_eq!(outcome.discarded_points, 0);
    assert_eq!(outcome.split_loss, 1);

    assert_eq!(leaf_list(centers), vec![
        ("0000".to_string(), 212, 53),
        ("1111".to_string(), 160, 159),
    ]);

    let zero = centers.find_leaf(&p("0000")).unwrap();
    let one = centers.find_leaf(&p("1111")).unwrap();
    assert_eq!(centers.cluster_diff(zero).unwrap(), Some(&[12u64, 12, 10, 0][..]));
    assert_eq!(centers.cluster_diff(one).unwrap(), Some(&[8u64, 8, 10, 2][..]));

    // the source is left untouched
    assert_eq!(source.summary().leaves, 5);
    assert_eq!(source.lookup(&p("0000")).unwrap(), LeafStats { occurrences: 200, ones: 50 });
}

#[test]
fn far_points_are_discarded() {
    let source = tree_with_counts(&[("0000", 200, 0), ("0011", 5, 3), ("0111", 7, 7), ("0001", 1, 0)]);
    let outcome = cluster_stats(&source, &config(1, 100, 10)).unwrap();

    assert_eq!(outcome.clusters, 1);
    assert_eq!(outcome.assigned_points, 1);
    assert_eq!(outcome.discarded_points, 2);
    assert_eq!(outcome.discarded_occurrences, 12);
    assert_eq!(outcome.tree.lookup(&p("0000")).unwrap().occurrences, 201);
}

#[test]
fn no_center_when_everything_is_rare() {
    let source = tree_with_counts(&[("01", 100, 1), ("10", 3, 3)]);
    let outcome = cluster_stats(&source, &config(5, 100, 10)).unwrap();

    assert_eq!(outcome.clusters, 0);
    assert!(outcome.tree.is_empty());
    assert_eq!(outcome.discarded_points, 2);
    assert_eq!(outcome.discarded_occurrences, 103);

    let empty = cluster_stats(&ContextTree::new(), &ClusterConfig::default()).unwrap();
    assert_eq!(empty.clusters, 0);
    assert_eq!(empty.discarded_points, 0);
}

#[test]
fn zero_max_clusters_discards_everything() {
    let source = tree_with_counts(&[("0000", 500, 10), ("0001", 300, 30), ("1111", 200, 200)]);
    let summary = source.summary();
    let outcome = cluster_stats(&source, &config(4, 0, 0)).unwrap();

    assert_eq!(outcome.clusters, 0);
    assert!(outcome.tree.is_empty());
    assert_eq!(outcome.assigned_points, 0);
    assert_eq!(outcome.discarded_points, summary.leaves);
    assert_eq!(outcome.discarded_occurrences, summary.occurrences);
    assert_eq!(outcome.split_loss, 0);
}

#[test]
fn center_count_is_bounded_and_ties_go_to_lowest_patch() {
    let source = tree_with_counts(&[("1010", 120, 0), ("0101", 120, 120), ("1111", 300, 300)]);

    let one = cluster_stats(&source, &config(0, 100, 1)).unwrap();
    assert_eq!(one.clusters, 1);
    assert_eq!(leaf_list(&one.tree), vec![("1111".to_string(), 300, 300)]);

    let two = cluster_stats(&source, &config(0, 100, 2)).unwrap();
    assert_eq!(two.clusters, 2);
    let patches: Vec<String> = leaf_list(&two.tree).into_iter().map(|(q, _, _)| q).collect();
    assert_eq!(patches, vec!["0101", "1111"]);
    assert_eq!(two.discarded_points, 1);
}

#[test]
fn occurrences_are_conserved() {
    let mut rng = StdRng::seed_from_u64(31);
    let k = 8;
    for round in 0..10 {
        let mut source = ContextTree::with_patch_len(k).unwrap();
        for _ in 0..300 {
            let occ = if rng.random_range(0..10) == 0 {
                rng.random_range(50..400u64)
            } else {
                rng.random_range(1..20u64)
            };
            let ones = rng.random_range(0..=occ);
            source.insert_counts(&random_patch(&mut rng, k), occ, ones).unwrap();
        }
        let total = source.summary().occurrences;
        let cfg = config(rng.random_range(1..4), 40, rng.random_range(1..30));
        let outcome = cluster_stats(&source, &cfg).unwrap();

        let clustered = outcome.tree.summary().occurrences;
        assert_eq!(
            clustered + outcome.discarded_occurrences + outcome.split_loss,
            total,
            "round {}",
            round
        );
        assert!(outcome.clusters <= cfg.max_clusters);
        assert_eq!(
            outcome.assigned_points + outcome.discarded_points + outcome.clusters as u64,
            source.summary().leaves
        );
        // inner counts stay consistent with the leaves
        assert_eq!(outcome.tree.node(outcome.tree.root()).unwrap().occurrences, clustered);
    }
}
