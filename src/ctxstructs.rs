//! Configuration structs for gathering, clustering and denoising

use crate::ctxdenoise::DenoiseRule;
use crate::ctxtemplate::{Norm, MAX_BALL_RADIUS};
use crate::{CtxError, Result};

/// What a denoiser does with a pixel whose context is not in the statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MissingContext {
    /// Leave the observed pixel unchanged
    #[default]
    Keep,
    /// Abort the pass with [`CtxError::NotFound`]
    Fail,
}

/// Shape of the neighborhood template built when no template file is given.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TemplateConfig {
    /// Ball radius, at least 1 and at most [`MAX_BALL_RADIUS`]
    pub radius: u32,
    /// Norm the ball is measured with
    pub norm: Norm,
    /// Whether the center pixel itself is part of the template
    pub include_center: bool,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            radius: 4,
            norm: Norm::L2,
            include_center: false,
        }
    }
}

impl TemplateConfig {
    /// Validation to ensure a non-empty template of bounded size
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.radius == 0 {
            return Err("Template radius must be at least 1");
        }
        if self.radius > MAX_BALL_RADIUS {
            return Err("Template radius must be at most 31");
        }
        Ok(())
    }
}

/// Parameters of the cluster engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Largest Hamming distance at which a context joins a center
    pub max_distance: usize,
    /// A center must occur strictly more often than this
    pub min_occurrences: u64,
    /// Upper bound on the number of centers
    pub max_clusters: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_distance: 10,
            min_occurrences: 100,
            max_clusters: 10_000,
        }
    }
}

/// High-level configuration of a denoising run
#[derive(Clone, Debug)]
pub struct DenoiseConfig {
    /// Channel probability P(0 -> 1)
    pub p01: f64,
    /// Channel probability P(1 -> 0)
    pub p10: f64,
    /// Per-pixel decision rule
    pub rule: DenoiseRule,
    /// Policy for contexts absent from the statistics
    pub missing: MissingContext,
    /// Number of gather/denoise passes when statistics come from the image itself
    pub iterations: u32,
    /// When set, neighbors up to this distance also vote (see `denoise_with_neighbors`)
    pub neighbor_distance: Option<usize>,
    /// Ball template used when no template file is given
    pub template: TemplateConfig,
    /// When set, statistics are clustered before denoising
    pub cluster: Option<ClusterConfig>,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            p01: 0.025,
            p10: 0.025,
            rule: DenoiseRule::Majority,
            missing: MissingContext::Keep,
            iterations: 1,
            neighbor_distance: None,
            template: TemplateConfig::default(),
            cluster: None,
        }
    }
}

impl DenoiseConfig {
    /// Creates a config for a symmetric channel, splitting `perr` evenly between
    /// the two flip directions.
    pub fn symmetric(perr: f64) -> Self {
        Self {
            p01: perr / 2.0,
            p10: perr / 2.0,
            ..Self::default()
        }
    }

    /// Total flip probability.
    pub fn error_rate(&self) -> f64 {
        self.p01 + self.p10
    }

    /// Checks probabilities, iteration count and template shape.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| CtxError::InvalidConfig {
            message: message.to_string(),
        };
        if !(0.0..0.5).contains(&self.p01) || !(0.0..0.5).contains(&self.p10) {
            return Err(invalid("flip probabilities must lie in [0, 0.5)"));
        }
        if self.iterations == 0 {
            return Err(invalid("at least one iteration is required"));
        }
        self.template.validate().map_err(invalid)?;
        Ok(())
    }
}
