//! Context-based denoising: gathering statistics from an image and applying a
//! per-pixel decision rule driven by them.
//!
//! A pass visits every pixel, extracts its patch from the context image (the noisy
//! image itself, or a prefiltered copy of it), looks the patch up in the statistics
//! and decides the output bit from the observed bit and the counts of that context.

use log::{debug, info, warn};
use std::fmt;
use std::str::FromStr;

use crate::ctxcluster::cluster_stats;
use crate::ctximage::BitImage;
use crate::ctxpatch::Patch;
use crate::ctxsearch::find_neighbors;
use crate::ctxstructs::{ClusterConfig, DenoiseConfig, MissingContext};
use crate::ctxtemplate::Template;
use crate::ctxtree::ContextTree;
use crate::{CtxError, Result};

/// Per-pixel decision rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DenoiseRule {
    /// Output 1 iff most occurrences of the context had a 1 center
    #[default]
    Majority,
    /// Keep the observed bit unless it is rarer in its context than the flips
    /// that would produce it
    Bayes,
    /// Discrete universal denoiser thresholds for a binary asymmetric channel
    Dude,
}

impl DenoiseRule {
    /// Output bit for observed bit `z` in a context seen `occurrences` times,
    /// `ones` of them with a 1 center. An unseen context keeps `z`.
    pub fn decide(self, z: bool, ones: u64, occurrences: u64, p01: f64, p10: f64) -> bool {
        self.decide_weighted(z, ones as f64, occurrences as f64, p01, p10)
    }

    /// Same as [`Self::decide`] on fractional (weighted) counts.
    pub fn decide_weighted(self, z: bool, ones: f64, occurrences: f64, p01: f64, p10: f64) -> bool {
        if occurrences <= 0.0 {
            return z;
        }
        match self {
            DenoiseRule::Majority => 2.0 * ones > occurrences,
            DenoiseRule::Bayes => {
                // keep z while it shows up in this context at least as often as
                // the channel alone would create it
                if z {
                    ones >= p01 * occurrences
                } else {
                    occurrences - ones < p10 * occurrences
                }
            }
            DenoiseRule::Dude => {
                if z {
                    let t1 = 2.0 * p01 * (1.0 - p10) / (1.0 + p01 - p10);
                    ones >= t1 * occurrences
                } else {
                    let t0 = 2.0 * p10 * (1.0 - p01) / (1.0 + p10 - p01);
                    let zeros = occurrences - ones;
                    zeros < t0 * occurrences
                }
            }
        }
    }
}

impl FromStr for DenoiseRule {
    type Err = CtxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "majority" | "mean" | "average" => Ok(DenoiseRule::Majority),
            "bayes" => Ok(DenoiseRule::Bayes),
            "dude" => Ok(DenoiseRule::Dude),
            other => Err(CtxError::InvalidConfig {
                message: format!("unknown denoising rule '{}'", other),
            }),
        }
    }
}

impl fmt::Display for DenoiseRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DenoiseRule::Majority => "majority",
            DenoiseRule::Bayes => "bayes",
            DenoiseRule::Dude => "dude",
        })
    }
}

/// Output of a denoising pass.
#[derive(Clone, Debug)]
pub struct DenoiseReport {
    /// The denoised image
    pub output: BitImage,
    /// Pixels flipped from 0 to 1
    pub changed_to_one: usize,
    /// Pixels flipped from 1 to 0
    pub changed_to_zero: usize,
    /// Pixels whose context had no statistics
    pub missing: usize,
}

impl DenoiseReport {
    fn new(noisy: &BitImage) -> Self {
        Self {
            output: noisy.clone(),
            changed_to_one: 0,
            changed_to_zero: 0,
            missing: 0,
        }
    }

    fn record(&mut self, idx: usize, z: bool, x: bool) {
        if x != z {
            self.output.set_linear(idx, x);
            if x {
                self.changed_to_one += 1;
            } else {
                self.changed_to_zero += 1;
            }
        }
    }

    /// Total number of flipped pixels.
    pub fn changed(&self) -> usize {
        self.changed_to_one + self.changed_to_zero
    }
}

fn check_same_size(noisy: &BitImage, context_image: &BitImage) -> Result<()> {
    if noisy.width != context_image.width || noisy.height != context_image.height {
        return Err(CtxError::InvalidImage {
            message: format!(
                "context image is {}x{} but noisy image is {}x{}",
                context_image.width, context_image.height, noisy.width, noisy.height
            ),
        });
    }
    Ok(())
}

/// Counts, for every patch of `context_image`, the center pixels of `noisy`.
///
/// Statistics are added to `tree` when given, so several images can share one
/// tree; otherwise a fresh tree is built.
pub fn gather_patch_stats(
    noisy: &BitImage,
    context_image: &BitImage,
    template: &Template,
    tree: Option<ContextTree>,
) -> Result<ContextTree> {
    check_same_size(noisy, context_image)?;
    let mut tree = match tree {
        Some(tree) => tree,
        None => ContextTree::with_patch_len(template.len())?,
    };
    let mut patch = Patch::zeros(template.len());
    for row in 0..noisy.height {
        for col in 0..noisy.width {
            template.extract_patch(context_image, row, col, &mut patch);
            tree.insert(&patch, noisy.get_linear(row * noisy.width + col))?;
        }
    }
    let summary = tree.summary();
    info!(
        "Gathered {}x{} image: {} distinct contexts, {} occurrences",
        noisy.width, noisy.height, summary.leaves, summary.occurrences
    );
    Ok(tree)
}

/// Denoises `noisy` using exact-context lookups into `stats`.
pub fn denoise(
    noisy: &BitImage,
    context_image: &BitImage,
    template: &Template,
    stats: &ContextTree,
    config: &DenoiseConfig,
) -> Result<DenoiseReport> {
    check_same_size(noisy, context_image)?;
    let mut report = DenoiseReport::new(noisy);
    let mut patch = Patch::zeros(template.len());
    for row in 0..noisy.height {
        for col in 0..noisy.width {
            let idx = row * noisy.width + col;
            let z = noisy.get_linear(idx);
            template.extract_patch(context_image, row, col, &mut patch);
            let x = match stats.lookup(&patch) {
                Ok(counts) => config
                    .rule
                    .decide(z, counts.ones, counts.occurrences, config.p01, config.p10),
                Err(CtxError::NotFound) => {
                    report.missing += 1;
                    match config.missing {
                        MissingContext::Keep => z,
                        MissingContext::Fail => return Err(CtxError::NotFound),
                    }
                }
                Err(e) => return Err(e),
            };
            report.record(idx, z, x);
        }
    }
    log_report(&report);
    Ok(report)
}

/// Denoises `noisy` pooling the exact context (weight 1) with every context of
/// `stats` within `max_distance` (weight `1/(d+1)` at distance `d`).
///
/// Meant for cluster trees, where the exact context is often absent.
pub fn denoise_with_neighbors(
    noisy: &BitImage,
    context_image: &BitImage,
    template: &Template,
    stats: &ContextTree,
    config: &DenoiseConfig,
    max_distance: usize,
) -> Result<DenoiseReport> {
    check_same_size(noisy, context_image)?;
    let mut report = DenoiseReport::new(noisy);
    let mut patch = Patch::zeros(template.len());
    for row in 0..noisy.height {
        for col in 0..noisy.width {
            let idx = row * noisy.width + col;
            let z = noisy.get_linear(idx);
            template.extract_patch(context_image, row, col, &mut patch);

            let (mut ones, mut occurrences) = match stats.lookup(&patch) {
                Ok(counts) => (counts.ones as f64, counts.occurrences as f64),
                Err(CtxError::NotFound) => (0.0, 0.0),
                Err(e) => return Err(e),
            };
            for neighbor in &find_neighbors(stats, &patch, max_distance)? {
                let counts = stats.leaf_stats(neighbor.leaf)?;
                let weight = 1.0 / (neighbor.distance as f64 + 1.0);
                ones += weight * counts.ones as f64;
                occurrences += weight * counts.occurrences as f64;
            }

            let x = if occurrences > 0.0 {
                config
                    .rule
                    .decide_weighted(z, ones, occurrences, config.p01, config.p10)
            } else {
                report.missing += 1;
                match config.missing {
                    MissingContext::Keep => z,
                    MissingContext::Fail => return Err(CtxError::NotFound),
                }
            };
            report.record(idx, z, x);
        }
    }
    log_report(&report);
    Ok(report)
}

/// One pass with externally supplied statistics, choosing the exact or the
/// neighbor-pooling denoiser from `config`.
pub fn denoise_pass(
    noisy: &BitImage,
    context_image: &BitImage,
    template: &Template,
    stats: &ContextTree,
    config: &DenoiseConfig,
) -> Result<DenoiseReport> {
    match config.neighbor_distance {
        Some(d) => denoise_with_neighbors(noisy, context_image, template, stats, config, d),
        None => denoise(noisy, context_image, template, stats, config),
    }
}

/// Clusters `stats` and denoises against the centers, pooling neighbors up to
/// `config.neighbor_distance` (or the clustering distance). Falls back to
/// [`denoise_pass`] on `stats` when clustering yields no center.
pub fn denoise_clustered(
    noisy: &BitImage,
    context_image: &BitImage,
    template: &Template,
    stats: &ContextTree,
    cluster: &ClusterConfig,
    config: &DenoiseConfig,
) -> Result<DenoiseReport> {
    let outcome = cluster_stats(stats, cluster)?;
    if outcome.clusters == 0 {
        warn!("Clustering produced no centers; falling back to exact statistics");
        return denoise_pass(noisy, context_image, template, stats, config);
    }
    let d = config.neighbor_distance.unwrap_or(cluster.max_distance);
    denoise_with_neighbors(noisy, context_image, template, &outcome.tree, config, d)
}

/// Gathers statistics from the image itself and denoises, `config.iterations`
/// times. Each round uses the previous output as the context image; the
/// center pixels always come from `noisy`.
pub fn denoise_iterated(
    noisy: &BitImage,
    prefiltered: Option<&BitImage>,
    template: &Template,
    config: &DenoiseConfig,
) -> Result<DenoiseReport> {
    config.validate()?;
    let mut context_image = prefiltered.unwrap_or(noisy).clone();
    let mut last: Option<DenoiseReport> = None;
    for round in 1..=config.iterations {
        debug!("Denoising round {}/{}", round, config.iterations);
        let raw = gather_patch_stats(noisy, &context_image, template, None)?;
        let report = match &config.cluster {
            Some(cluster) => denoise_clustered(noisy, &context_image, template, &raw, cluster, config)?,
            None => denoise_pass(noisy, &context_image, template, &raw, config)?,
        };
        context_image = report.output.clone();
        last = Some(report);
    }
    last.ok_or_else(|| CtxError::InvalidConfig {
        message: "at least one iteration is required".to_string(),
    })
}

fn log_report(report: &DenoiseReport) {
    info!(
        "Denoised: {} pixels changed ({} to 1, {} to 0), {} without statistics",
        report.changed(),
        report.changed_to_one,
        report.changed_to_zero,
        report.missing
    );
}
