// Decision rules, statistics gathering and denoising passes
mod common;

use common::{img_from_strings, p, striped_image, tree_with_counts};
use ctxden::ctxdenoise::denoise_iterated;
use ctxden::ctxtemplate::Norm;
use ctxden::{
    denoise, denoise_clustered, denoise_with_neighbors, gather_patch_stats, ClusterConfig,
    ContextTree, CtxError, DenoiseConfig, DenoiseRule, MissingContext, Template,
};

fn ring() -> Template {
    Template::ball(1, Norm::LInf, false).unwrap()
}

fn cross() -> Template {
    Template::ball(1, Norm::L1, false).unwrap()
}

#[test]
fn majority_rule() {
    let rule = DenoiseRule::Majority;
    assert!(rule.decide(false, 3, 5, 0.1, 0.1));
    assert!(!rule.decide(true, 2, 4, 0.1, 0.1));
    assert!(!rule.decide(true, 0, 7, 0.1, 0.1));
    // unseen contexts keep the observed bit
    assert!(rule.decide(true, 0, 0, 0.1, 0.1));
    assert!(!rule.decide(false, 0, 0, 0.1, 0.1));
}

#[test]
fn dude_rule_thresholds() {
    // symmetric channel: t0 = t1 = 2 * 0.1 * 0.9 = 0.18
    let rule = DenoiseRule::Dude;
    assert!(!rule.decide(true, 1, 10, 0.1, 0.1));
    assert!(rule.decide(true, 2, 10, 0.1, 0.1));
    assert!(rule.decide(false, 9, 10, 0.1, 0.1));
    assert!(!rule.decide(false, 5, 10, 0.1, 0.1));
    assert!(rule.decide(true, 0, 0, 0.1, 0.1));

    // a channel that never turns 1s into 0s never flips a 0 up
    assert!(!rule.decide(false, 10, 10, 0.2, 0.0));
}

#[test]
fn bayes_rule_compares_with_flip_rates() {
    let rule = DenoiseRule::Bayes;
    // a 1 seen in 3% of the context survives a 2.5% flip rate
    assert!(rule.decide(true, 3, 100, 0.025, 0.025));
    assert!(!rule.decide(true, 2, 100, 0.025, 0.025));
    // a 0 in a context that is 97% ones
    assert!(!rule.decide(false, 97, 100, 0.025, 0.025));
    assert!(rule.decide(false, 98, 100, 0.025, 0.025));
    // each direction uses its own rate
    assert!(rule.decide(true, 3, 100, 0.025, 0.5));
    assert!(!rule.decide(true, 3, 100, 0.05, 0.0));
    assert!(!rule.decide(false, 0, 0, 0.1, 0.1));
    assert!(rule.decide(true, 0, 0, 0.1, 0.1));
}

#[test]
fn bayes_and_dude_disagree_near_the_thresholds() {
    // DUDE needs 2*0.025*0.975 = 4.875% before it keeps a bit
    assert!(DenoiseRule::Bayes.decide(true, 3, 100, 0.025, 0.025));
    assert!(!DenoiseRule::Dude.decide(true, 3, 100, 0.025, 0.025));
    assert!(!DenoiseRule::Bayes.decide(false, 97, 100, 0.025, 0.025));
    assert!(DenoiseRule::Dude.decide(false, 97, 100, 0.025, 0.025));

    let mut differ = 0;
    for ones in 0..=100 {
        for z in [false, true] {
            let bayes = DenoiseRule::Bayes.decide(z, ones, 100, 0.025, 0.025);
            let dude = DenoiseRule::Dude.decide(z, ones, 100, 0.025, 0.025);
            if bayes != dude {
                differ += 1;
            }
        }
    }
    // ones in {3, 4} for z = 1 and zeros in {3, 4} for z = 0
    assert_eq!(differ, 4);
}

#[test]
fn rule_names() {
    assert_eq!("MEAN".parse::<DenoiseRule>().unwrap(), DenoiseRule::Majority);
    assert_eq!("average".parse::<DenoiseRule>().unwrap(), DenoiseRule::Majority);
    assert_eq!(" Dude ".parse::<DenoiseRule>().unwrap(), DenoiseRule::Dude);
    assert_eq!("bayes".parse::<DenoiseRule>().unwrap(), DenoiseRule::Bayes);
    assert!(matches!("median".parse::<DenoiseRule>(), Err(CtxError::InvalidConfig { .. })));
    assert_eq!(DenoiseRule::Dude.to_string(), "dude");
}

#[test]
fn gather_counts_every_pixel() {
    let image = img_from_strings(&["010", "111", "010"]);
    let tree = gather_patch_stats(&image, &image, &cross(), None).unwrap();

    assert_eq!(tree.patch_len(), 4);
    let summary = tree.summary();
    assert_eq!(summary.occurrences, 9);
    assert_eq!(summary.ones, 5);

    // cross order: up, left, right, down; the center sees 1s all around
    let center = tree.lookup(&p("1111")).unwrap();
    assert_eq!((center.occurrences, center.ones), (1, 1));
    // the four corners all see two 1s (right/down, left/down, ...) and are 0
    let top_left = tree.lookup(&p("0011")).unwrap();
    assert_eq!((top_left.occurrences, top_left.ones), (1, 0));

    // gathering a second image accumulates into the same tree
    let again = gather_patch_stats(&image, &image, &cross(), Some(tree)).unwrap();
    assert_eq!(again.summary().occurrences, 18);
}

#[test]
fn gather_rejects_mismatched_inputs() {
    let a = img_from_strings(&["01", "10"]);
    let b = img_from_strings(&["011", "100"]);
    assert!(matches!(
        gather_patch_stats(&a, &b, &cross(), None),
        Err(CtxError::InvalidImage { .. })
    ));

    let other_k = tree_with_counts(&[("01", 1, 1)]);
    assert!(matches!(
        gather_patch_stats(&a, &a, &cross(), Some(other_k)),
        Err(CtxError::PatchLengthMismatch { .. })
    ));
}

#[test]
fn removes_an_isolated_flip() {
    let clean = striped_image();
    let mut noisy = clean.clone();
    noisy.set_pixel(1, 10, false);

    let stats = gather_patch_stats(&noisy, &noisy, &ring(), None).unwrap();
    let config = DenoiseConfig::default();
    let report = denoise(&noisy, &noisy, &ring(), &stats, &config).unwrap();

    assert_eq!(report.changed_to_one, 1);
    assert_eq!(report.changed_to_zero, 0);
    assert_eq!(report.missing, 0);
    assert_eq!(report.output, clean);
    assert_eq!(report.output.count_differences(&clean), 0);
}

#[test]
fn iterated_denoising_converges_on_stripes() {
    let clean = striped_image();
    let mut noisy = clean.clone();
    noisy.set_pixel(1, 10, false);
    noisy.set_pixel(18, 20, false);

    let config = DenoiseConfig {
        iterations: 2,
        ..DenoiseConfig::default()
    };
    let report = denoise_iterated(&noisy, None, &ring(), &config).unwrap();
    assert_eq!(report.output, clean);
    assert_eq!(report.changed(), 2);

    let bad = DenoiseConfig {
        iterations: 0,
        ..DenoiseConfig::default()
    };
    assert!(matches!(
        denoise_iterated(&noisy, None, &ring(), &bad),
        Err(CtxError::InvalidConfig { .. })
    ));
}

#[test]
fn missing_context_policy() {
    let noisy = img_from_strings(&["0110", "1001"]);
    let empty = ContextTree::with_patch_len(4).unwrap();

    let keep = DenoiseConfig::default();
    let report = denoise(&noisy, &noisy, &cross(), &empty, &keep).unwrap();
    assert_eq!(report.missing, 8);
    assert_eq!(report.changed(), 0);
    assert_eq!(report.output, noisy);

    let fail = DenoiseConfig {
        missing: MissingContext::Fail,
        ..DenoiseConfig::default()
    };
    assert!(matches!(
        denoise(&noisy, &noisy, &cross(), &empty, &fail),
        Err(CtxError::NotFound)
    ));
}

#[test]
fn neighbors_vote_when_exact_context_is_absent() {
    let noisy = img_from_strings(&["000", "000", "000"]);
    // every pixel sees 0000; only a distance-1 context is known
    let stats = tree_with_counts(&[("0001", 10, 10)]);
    let config = DenoiseConfig::default();

    let report = denoise_with_neighbors(&noisy, &noisy, &cross(), &stats, &config, 1).unwrap();
    assert_eq!(report.changed_to_one, 9);
    assert_eq!(report.output.count_ones(), 9);
    assert_eq!(report.missing, 0);

    let exact_only = denoise_with_neighbors(&noisy, &noisy, &cross(), &stats, &config, 0).unwrap();
    assert_eq!(exact_only.missing, 9);
    assert_eq!(exact_only.changed(), 0);
}

#[test]
fn neighbor_weights_shrink_with_distance() {
    let noisy = img_from_strings(&["0"]);
    // exact context 0000 says 0 (weight 1); two distance-1 contexts say 1 (weight 1/2 each)
    let stats = tree_with_counts(&[("0000", 10, 0), ("0001", 8, 8), ("0010", 8, 8)]);
    let config = DenoiseConfig::default();

    // ones = 8, occurrences = 10 + 8 = 18: still a 0
    let report = denoise_with_neighbors(&noisy, &noisy, &cross(), &stats, &config, 1).unwrap();
    assert_eq!(report.changed(), 0);

    let stats = tree_with_counts(&[("0000", 6, 0), ("0001", 8, 8), ("0010", 8, 8)]);
    // ones = 8, occurrences = 14: now a 1
    let report = denoise_with_neighbors(&noisy, &noisy, &cross(), &stats, &config, 1).unwrap();
    assert_eq!(report.changed_to_one, 1);
}

#[test]
fn clustering_without_centers_falls_back_to_exact_statistics() {
    let clean = striped_image();
    let mut noisy = clean.clone();
    noisy.set_pixel(1, 10, false);
    let stats = gather_patch_stats(&noisy, &noisy, &ring(), None).unwrap();
    let config = DenoiseConfig::default();

    let rare = ClusterConfig {
        min_occurrences: 1_000_000,
        ..ClusterConfig::default()
    };
    let fallback = denoise_clustered(&noisy, &noisy, &ring(), &stats, &rare, &config).unwrap();
    let exact = denoise(&noisy, &noisy, &ring(), &stats, &config).unwrap();
    assert_eq!(fallback.output, exact.output);
    assert_eq!(fallback.missing, 0);
    assert_eq!(fallback.output, clean);

    // with centers, every context of 8 samples lies within distance 10 of one
    let frequent = ClusterConfig {
        min_occurrences: 10,
        ..ClusterConfig::default()
    };
    let clustered = denoise_clustered(&noisy, &noisy, &ring(), &stats, &frequent, &config).unwrap();
    assert_eq!(clustered.missing, 0);
}

#[test]
fn iterated_clustering_without_centers_matches_plain_run() {
    let clean = striped_image();
    let mut noisy = clean.clone();
    noisy.set_pixel(18, 20, false);

    let plain = denoise_iterated(&noisy, None, &ring(), &DenoiseConfig::default()).unwrap();
    let clustered = DenoiseConfig {
        cluster: Some(ClusterConfig {
            min_occurrences: 1_000_000,
            ..ClusterConfig::default()
        }),
        ..DenoiseConfig::default()
    };
    let report = denoise_iterated(&noisy, None, &ring(), &clustered).unwrap();
    assert_eq!(report.output, plain.output);
    assert_eq!(report.missing, 0);
}

#[test]
fn config_validation() {
    assert!(DenoiseConfig::default().validate().is_ok());
    let sym = DenoiseConfig::symmetric(0.1);
    assert!((sym.p01 - 0.05).abs() < 1e-12);
    assert!((sym.error_rate() - 0.1).abs() < 1e-12);

    let too_noisy = DenoiseConfig {
        p10: 0.5,
        ..DenoiseConfig::default()
    };
    assert!(matches!(too_noisy.validate(), Err(CtxError::InvalidConfig { .. })));

    let mut no_template = DenoiseConfig::default();
    no_template.template.radius = 0;
    assert!(no_template.validate().is_err());

    let mut huge_template = DenoiseConfig::default();
    huge_template.template.radius = 100_000;
    assert!(matches!(huge_template.validate(), Err(CtxError::InvalidConfig { .. })));
}
