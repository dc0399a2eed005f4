//! Patches: the fixed-length binary sample vectors used as context keys.

use bitvec::order::Msb0;
use bitvec::prelude::*;
use std::fmt;
use std::str::FromStr;

use crate::{CtxError, Result};

/// Upper bound on the patch length accepted by a context tree.
pub const MAX_PATCH_LEN: usize = 4096;

/// An ordered sequence of `k` binary samples drawn around a center pixel.
///
/// The sample order is whatever canonical order the producing template defines;
/// the tree only relies on it being the same for every patch it sees.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Patch {
    bits: BitVec<u8, Msb0>,
}

impl Patch {
    /// Creates an all-zero patch of length `k`.
    pub fn zeros(k: usize) -> Self {
        Self {
            bits: bitvec![u8, Msb0; 0; k],
        }
    }

    /// Builds a patch from booleans.
    pub fn from_bools(samples: &[bool]) -> Self {
        let mut bits = BitVec::with_capacity(samples.len());
        bits.extend(samples.iter().copied());
        Self { bits }
    }

    /// Builds a patch from raw 0/1 samples, rejecting any other value.
    pub fn from_samples(samples: &[u8]) -> Result<Self> {
        let mut bits = BitVec::with_capacity(samples.len());
        for (position, &value) in samples.iter().enumerate() {
            match value {
                0 => bits.push(false),
                1 => bits.push(true),
                _ => return Err(CtxError::InvalidSample { position, value }),
            }
        }
        Ok(Self { bits })
    }

    /// Number of samples (`k`).
    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// True for a zero-length patch.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Sample at `idx`.
    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        self.bits[idx]
    }

    /// Sample at `idx` as a child slot index.
    #[inline]
    pub(crate) fn slot(&self, idx: usize) -> usize {
        self.bits[idx] as usize
    }

    /// Overwrites the sample at `idx`.
    #[inline]
    pub fn set(&mut self, idx: usize, value: bool) {
        self.bits.set(idx, value);
    }

    /// Resizes to `k` samples, zero-filling new positions.
    pub fn resize(&mut self, k: usize) {
        self.bits.resize(k, false);
    }

    /// Read-only view of the samples.
    pub fn as_bits(&self) -> &BitSlice<u8, Msb0> {
        &self.bits
    }

    /// Samples as 0/1 bytes.
    pub fn to_samples(&self) -> Vec<u8> {
        self.bits.iter().map(|b| *b as u8).collect()
    }

    /// Number of samples equal to 1.
    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    /// Number of positions at which the two patches differ.
    ///
    /// Patches of different length are compared over the shorter prefix, with each
    /// extra sample counted as a mismatch.
    pub fn hamming(&self, other: &Patch) -> usize {
        let n = self.len().min(other.len());
        let common = self.bits[..n]
            .iter()
            .zip(other.bits[..n].iter())
            .filter(|(a, b)| **a != **b)
            .count();
        common + self.len().max(other.len()) - n
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.bits.iter() {
            f.write_str(if *bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromStr for Patch {
    type Err = CtxError;

    /// Parses a string of `0`/`1` characters, ignoring whitespace and separators.
    fn from_str(s: &str) -> Result<Self> {
        let mut bits = BitVec::new();
        for (position, ch) in s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_')
            .enumerate()
        {
            match ch {
                '0' => bits.push(false),
                '1' => bits.push(true),
                other => {
                    return Err(CtxError::InvalidSample {
                        position,
                        value: u8::try_from(u32::from(other)).unwrap_or(u8::MAX),
                    })
                }
            }
        }
        Ok(Self { bits })
    }
}

impl From<BitVec<u8, Msb0>> for Patch {
    fn from(bits: BitVec<u8, Msb0>) -> Self {
        Self { bits }
    }
}
