//! Context-tree denoising for binary images
//!
//! This crate gathers, for every local neighborhood ("patch") observed in a noisy
//! bitmap, the empirical distribution of the center pixel, and then applies a
//! minimum-risk decision rule per pixel. The statistics live in a binary trie keyed
//! by patch samples, which also supports Hamming-bounded neighbor search,
//! depth-first leaf enumeration, clustering into a compact codebook and a compact
//! on-disk format.

#![warn(missing_docs)]

use thiserror::Error;

/// Errors that can occur while gathering, storing or using context statistics
#[derive(Error, Debug)]
pub enum CtxError {
    /// The queried context was never observed while gathering
    #[error("Context not found in statistics tree")]
    NotFound,

    /// A patch does not have the length the tree was built with
    #[error("Patch length mismatch: tree uses k={expected}, got {actual}")]
    PatchLengthMismatch {
        /// Patch length of the tree
        expected: usize,
        /// Length of the offending patch
        actual: usize,
    },

    /// The patch length is zero or unreasonably large
    #[error("Invalid patch length {len} (must be between 1 and {max})")]
    InvalidPatchLength {
        /// Requested length
        len: usize,
        /// Largest supported length
        max: usize,
    },

    /// A raw sample outside the binary alphabet
    #[error("Invalid sample {value} at position {position}: only 0 and 1 are allowed")]
    InvalidSample {
        /// Index of the sample in the patch
        position: usize,
        /// The rejected value
        value: u8,
    },

    /// The serialized stream ended early
    #[error("Truncated statistics stream while reading {context}")]
    Truncated {
        /// What was being read when the stream ended
        context: &'static str,
    },

    /// The serialized stream is structurally invalid
    #[error("Malformed statistics stream: {message}")]
    Malformed {
        /// Description of the problem
        message: String,
    },

    /// Underlying I/O failure
    #[error("I/O error")]
    Io {
        /// The I/O error
        #[from]
        source: std::io::Error,
    },

    /// Array shape error during image conversion
    #[error("Array shape error")]
    ArrayShape {
        /// The shape error
        #[from]
        source: ndarray::ShapeError,
    },

    /// Image could not be decoded or is not binary
    #[error("Invalid image: {message}")]
    InvalidImage {
        /// Description of the problem
        message: String,
    },

    /// Template could not be read or is empty
    #[error("Invalid template: {message}")]
    InvalidTemplate {
        /// Description of the problem
        message: String,
    },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem
        message: String,
    },

    /// A node handle outlived the node it referred to
    #[error("Stale node handle")]
    StaleNode,
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CtxError>;

// Module declarations
pub mod ctxcluster;
pub mod ctxdenoise;
pub mod ctxestimate;
pub mod ctximage;
pub mod ctxio;
pub mod ctxiter;
pub mod ctxnode;
pub mod ctxpatch;
pub mod ctxsearch;
pub mod ctxshared;
pub mod ctxstructs;
pub mod ctxtemplate;
pub mod ctxtree;

// Re-export the main entry points
pub use ctxcluster::{cluster_stats, ClusterOutcome};
pub use ctxdenoise::{
    denoise, denoise_clustered, denoise_iterated, denoise_pass, denoise_with_neighbors,
    gather_patch_stats, DenoiseReport, DenoiseRule,
};
pub use ctxestimate::{estimate_noise, quorum_stats, QuorumStats};
pub use ctximage::{compare_images, median_filter, BitImage, ImageComparison};
pub use ctxio::{load_stats, read_tree, save_stats, write_tree};
pub use ctxiter::DepthFirst;
pub use ctxnode::NodeId;
pub use ctxpatch::Patch;
pub use ctxsearch::{find_neighbors, Neighbor, NeighborList};
pub use ctxstructs::{ClusterConfig, DenoiseConfig, MissingContext, TemplateConfig};
pub use ctxtemplate::{Norm, Template};
pub use ctxtree::{ContextTree, LeafStats, TreeSummary};

/// Get the version string for the crate
pub fn get_version() -> String {
    format!("ctxden {}", env!("CARGO_PKG_VERSION"))
}

/// Get the build information string
pub fn get_build_info() -> String {
    let build_ts = option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown");
    let build_type = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    format!("{} (built with {})", build_ts, build_type)
}
