// Channel estimation from quorum statistics
mod common;

use common::img_from_strings;
use ctxden::ctxestimate::{DEFAULT_MAX_TERMS, DEFAULT_TOLERANCE};
use ctxden::ctximage::add_noise;
use ctxden::ctxtemplate::Norm;
use ctxden::{estimate_noise, quorum_stats, BitImage, CtxError, Template};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn ring() -> Template {
    Template::ball(1, Norm::LInf, false).unwrap()
}

/// White top half, black bottom half.
fn half_and_half(size: usize) -> BitImage {
    let mut img = BitImage::new(size as u32, size as u32).unwrap();
    for row in size / 2..size {
        for col in 0..size {
            img.set_pixel(row as i64, col as i64, true);
        }
    }
    img
}

#[test]
fn quorum_histogram() {
    let img = img_from_strings(&["000", "010", "000"]);
    let stats = quorum_stats(&img, &img, &ring()).unwrap();

    assert_eq!(stats.patch_len(), 8);
    assert_eq!(stats.total(), 9);
    // the center pixel sees nothing, its eight neighbors see it once
    assert_eq!(stats.freq[0], 1);
    assert_eq!(stats.freq_ones[0], 1);
    assert_eq!(stats.freq[1], 8);
    assert_eq!(stats.freq_ones[1], 0);
    assert_eq!(stats.freq[2..].iter().sum::<u64>(), 0);

    let other = img_from_strings(&["00", "00"]);
    assert!(matches!(
        quorum_stats(&img, &other, &ring()),
        Err(CtxError::InvalidImage { .. })
    ));
}

#[test]
fn recovers_asymmetric_flip_rates() {
    let clean = half_and_half(200);
    let (noisy, _) = add_noise(&clean, 0.04, 0.06, &mut StdRng::seed_from_u64(17));
    let stats = quorum_stats(&noisy, &noisy, &ring()).unwrap();
    let (p01, p10) = estimate_noise(&stats, DEFAULT_MAX_TERMS, DEFAULT_TOLERANCE).unwrap();

    assert!((0.03..0.05).contains(&p01), "p01 = {}", p01);
    assert!((0.05..0.07).contains(&p10), "p10 = {}", p10);
}

#[test]
fn clean_image_estimates_no_noise() {
    let clean = BitImage::new(100, 100).unwrap();
    let stats = quorum_stats(&clean, &clean, &ring()).unwrap();
    let (p01, _) = estimate_noise(&stats, DEFAULT_MAX_TERMS, DEFAULT_TOLERANCE).unwrap();
    assert!(p01 < 1e-3, "p01 = {}", p01);
}

#[test]
fn bad_estimation_inputs() {
    let img = img_from_strings(&["01", "10"]);
    let stats = quorum_stats(&img, &img, &ring()).unwrap();
    assert!(matches!(estimate_noise(&stats, 5, 0.0), Err(CtxError::InvalidConfig { .. })));
    assert!(matches!(estimate_noise(&stats, 5, f64::NAN), Err(CtxError::InvalidConfig { .. })));
    // more terms than quorum values is clamped
    assert!(estimate_noise(&stats, 50, 1e-3).is_ok());
}
