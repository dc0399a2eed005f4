//! Channel estimation: guesses `p01` and `p10` from how often the center pixel
//! disagrees with almost uniform neighborhoods.
//!
//! The quorum of a patch is its number of 1 samples. In a clean bilevel image,
//! patches with quorum near 0 come from white areas and patches with quorum near
//! `k` from black ones, so the centers that disagree with them are mostly noise.

use log::{debug, info};

use crate::ctximage::BitImage;
use crate::ctxpatch::Patch;
use crate::ctxtemplate::Template;
use crate::{CtxError, Result};

/// Golden-section search tolerance used by default
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Default number of quorum values at each end taken as "uniform"
pub const DEFAULT_MAX_TERMS: usize = 5;

/// Histogram of patch quorums over an image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumStats {
    /// `freq[q]`: pixels whose patch has `q` ones
    pub freq: Vec<u64>,
    /// `freq_ones[q]`: those of them with a 1 center
    pub freq_ones: Vec<u64>,
}

impl QuorumStats {
    /// Patch length the histogram was built for.
    pub fn patch_len(&self) -> usize {
        self.freq.len() - 1
    }

    /// Number of pixels counted.
    pub fn total(&self) -> u64 {
        self.freq.iter().sum()
    }
}

/// Counts quorums of `context_image` patches with their center from `noisy`.
pub fn quorum_stats(
    noisy: &BitImage,
    context_image: &BitImage,
    template: &Template,
) -> Result<QuorumStats> {
    if noisy.width != context_image.width || noisy.height != context_image.height {
        return Err(CtxError::InvalidImage {
            message: "context image and noisy image differ in size".to_string(),
        });
    }
    let k = template.len();
    let mut stats = QuorumStats {
        freq: vec![0; k + 1],
        freq_ones: vec![0; k + 1],
    };
    let mut patch = Patch::zeros(k);
    for row in 0..noisy.height {
        for col in 0..noisy.width {
            template.extract_patch(context_image, row, col, &mut patch);
            let q = patch.count_ones();
            stats.freq[q] += 1;
            if noisy.get_linear(row * noisy.width + col) {
                stats.freq_ones[q] += 1;
            }
        }
    }
    Ok(stats)
}

/// Negative log-likelihood of flip probability `p` over the quorums in `range`.
/// `ones_are_noise` selects the white end (1 centers and 1 samples are flips)
/// or the black end.
fn neg_log_likelihood(stats: &QuorumStats, range: &[usize], ones_are_noise: bool, p: f64) -> f64 {
    let k = stats.patch_len() as f64;
    let (log_p, log_q) = (p.log10(), (1.0 - p).log10());
    let mut a = 0.0;
    for &r in range {
        let n = stats.freq[r] as f64;
        let n1 = stats.freq_ones[r] as f64;
        let r = r as f64;
        let (flipped_centers, flipped_samples) = if ones_are_noise {
            (n1, r)
        } else {
            (n - n1, k - r)
        };
        a += n
            * (flipped_centers * log_p
                + (n - flipped_centers) * log_q
                + flipped_samples * log_p
                + (k - flipped_samples) * log_q);
    }
    -a / stats.total().max(1) as f64
}

/// Minimizes `f` over [0, 0.5] by golden-section search.
fn golden_section<F: Fn(f64) -> f64>(f: F, tolerance: f64) -> f64 {
    let phi = (1.0 + 5f64.sqrt()) / 2.0;
    let r = 1.0 / (1.0 + phi);
    let (mut left, mut right) = (0.0f64, 0.5f64);
    while right - left >= tolerance {
        let mid_left = left + r * (right - left);
        let mid_right = right - r * (right - left);
        if f(mid_left) < f(mid_right) {
            right = mid_right;
        } else {
            left = mid_left;
        }
    }
    (left + right) / 2.0
}

/// Maximum-likelihood estimate of `(p01, p10)`, looking only at the
/// `max_terms + 1` most uniform quorums at each end.
pub fn estimate_noise(stats: &QuorumStats, max_terms: usize, tolerance: f64) -> Result<(f64, f64)> {
    if stats.total() == 0 {
        return Err(CtxError::InvalidImage {
            message: "no pixels to estimate noise from".to_string(),
        });
    }
    if tolerance.is_nan() || tolerance <= 0.0 {
        return Err(CtxError::InvalidConfig {
            message: format!("tolerance must be positive, got {}", tolerance),
        });
    }
    let k = stats.patch_len();
    let terms = max_terms.min(k);
    let white: Vec<usize> = (0..=terms).collect();
    let black: Vec<usize> = (k - terms..=k).rev().collect();

    let p01 = golden_section(|p| neg_log_likelihood(stats, &white, true, p), tolerance);
    let p10 = golden_section(|p| neg_log_likelihood(stats, &black, false, p), tolerance);
    debug!("Quorum histogram: {:?} (ones {:?})", stats.freq, stats.freq_ones);
    info!("Estimated P(0->1)={:.6} P(1->0)={:.6}", p01, p10);
    Ok((p01, p10))
}
