//! Utility functions shared across the crate

use crate::{CtxError, Result};

// ==============================================
// Type conversion utilities
// ==============================================

/// Convert from u32 to usize.
#[inline]
pub fn u32_to_usize(x: u32) -> usize {
    x as usize
}

/// Convert from usize to u32, rejecting values that do not fit.
#[inline]
pub fn usize_to_u32(x: usize) -> Result<u32> {
    u32::try_from(x).map_err(|_| CtxError::InvalidImage {
        message: format!("dimension {} exceeds u32 range", x),
    })
}

/// `part` as a percentage of `total`, 0 when `total` is 0.
#[inline]
pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * part as f64 / total as f64
    }
}
