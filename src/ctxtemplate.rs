//! Patch templates: the set of pixel offsets, in canonical order, that make up a context.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

use crate::ctximage::BitImage;
use crate::ctxpatch::Patch;
use crate::{CtxError, Result};

/// Distance used to shape ball templates and to order their offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Norm {
    /// Manhattan distance (diamond-shaped balls)
    L1,
    /// Euclidean distance (round balls)
    L2,
    /// Chebyshev distance (square balls)
    LInf,
}

impl Norm {
    /// Distance of an offset from the center. L2 is reported squared, which
    /// orders offsets the same way without floating point.
    #[inline]
    pub fn measure(self, di: i32, dj: i32) -> u64 {
        let (a, b) = (u64::from(di.unsigned_abs()), u64::from(dj.unsigned_abs()));
        match self {
            Norm::L1 => a + b,
            Norm::L2 => a * a + b * b,
            Norm::LInf => a.max(b),
        }
    }

    /// `measure` of a point lying exactly on the ball's boundary.
    #[inline]
    fn bound(self, radius: u32) -> u64 {
        let radius = u64::from(radius);
        match self {
            Norm::L2 => radius * radius,
            _ => radius,
        }
    }
}

impl FromStr for Norm {
    type Err = CtxError;

    /// Accepts `1`, `2`, `inf` or `0` (the latter two meaning L-infinity).
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "l1" => Ok(Norm::L1),
            "2" | "l2" => Ok(Norm::L2),
            "0" | "inf" | "linf" => Ok(Norm::LInf),
            other => Err(CtxError::InvalidConfig {
                message: format!("unknown norm '{}' (expected 1, 2 or inf)", other),
            }),
        }
    }
}

/// Largest radius accepted by [`Template::ball`]; the full square of this radius
/// still fits in a patch.
pub const MAX_BALL_RADIUS: u32 = 31;

/// Ordered list of (row, col) offsets relative to the center pixel.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Template {
    offsets: Vec<(i32, i32)>,
}

impl Template {
    /// Wraps a list of offsets as given.
    pub fn from_offsets(offsets: Vec<(i32, i32)>) -> Result<Self> {
        if offsets.is_empty() {
            return Err(CtxError::InvalidTemplate {
                message: "template has no offsets".to_string(),
            });
        }
        Ok(Self { offsets })
    }

    /// Every offset within `radius` of the center under `norm`, sorted by distance.
    pub fn ball(radius: u32, norm: Norm, include_center: bool) -> Result<Self> {
        if radius == 0 && !include_center {
            return Err(CtxError::InvalidTemplate {
                message: "a radius-0 ball without its center is empty".to_string(),
            });
        }
        if radius > MAX_BALL_RADIUS {
            return Err(CtxError::InvalidTemplate {
                message: format!("radius {} exceeds {}", radius, MAX_BALL_RADIUS),
            });
        }
        let r = radius as i32;
        let bound = norm.bound(radius);
        let mut offsets = Vec::new();
        for di in -r..=r {
            for dj in -r..=r {
                if (di, dj) == (0, 0) && !include_center {
                    continue;
                }
                if norm.measure(di, dj) <= bound {
                    offsets.push((di, dj));
                }
            }
        }
        let mut template = Self { offsets };
        template.sort_by_distance(norm);
        Ok(template)
    }

    /// Canonical order: by distance under `norm`, then row, then column.
    pub fn sort_by_distance(&mut self, norm: Norm) {
        self.offsets
            .sort_by_key(|&(di, dj)| (norm.measure(di, dj), di, dj));
    }

    /// Keeps the first `k` offsets, the `k` closest ones after a distance sort.
    pub fn truncate(&mut self, k: usize) -> Result<()> {
        if k == 0 {
            return Err(CtxError::InvalidTemplate {
                message: "cannot truncate a template to 0 offsets".to_string(),
            });
        }
        self.offsets.truncate(k);
        Ok(())
    }

    /// Reads a two-row whitespace matrix: row offsets on the first line, column
    /// offsets on the second. A (0, 0) column ends the template early.
    pub fn read_ascii<R: Read>(reader: R) -> Result<Self> {
        let mut rows: Vec<Vec<i32>> = Vec::new();
        for line in BufReader::new(reader).lines() {
            let line = line?;
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let values = line
                .split_whitespace()
                .map(parse_offset)
                .collect::<Result<Vec<_>>>()?;
            rows.push(values);
        }
        let [is, js] = rows.as_slice() else {
            return Err(CtxError::InvalidTemplate {
                message: format!("expected 2 rows of offsets, found {}", rows.len()),
            });
        };
        if is.len() != js.len() {
            return Err(CtxError::InvalidTemplate {
                message: format!("row lengths differ: {} vs {}", is.len(), js.len()),
            });
        }
        let offsets = is
            .iter()
            .zip(js)
            .map(|(&i, &j)| (i, j))
            .take_while(|&o| o != (0, 0))
            .collect();
        Self::from_offsets(offsets)
    }

    /// Reads a template file in the format of [`Self::read_ascii`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read_ascii(File::open(path)?)
    }

    /// Writes the template in the format read by [`Self::read_ascii`].
    pub fn write_ascii<W: Write>(&self, out: &mut W) -> Result<()> {
        let rows: Vec<String> = self.offsets.iter().map(|o| o.0.to_string()).collect();
        let cols: Vec<String> = self.offsets.iter().map(|o| o.1.to_string()).collect();
        writeln!(out, "{}", rows.join(" "))?;
        writeln!(out, "{}", cols.join(" "))?;
        Ok(())
    }

    /// Saves the template to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_ascii(&mut out)?;
        out.flush()?;
        Ok(())
    }

    /// Number of offsets, which is the patch length `k`.
    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True when the template has no offsets.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Offsets in canonical order.
    pub fn offsets(&self) -> &[(i32, i32)] {
        &self.offsets
    }

    /// Fills `patch` with the samples around (`row`, `col`); pixels outside the
    /// image read as 0.
    pub fn extract_patch(&self, image: &BitImage, row: usize, col: usize, patch: &mut Patch) {
        patch.resize(self.offsets.len());
        let (row, col) = (row as i64, col as i64);
        for (idx, &(di, dj)) in self.offsets.iter().enumerate() {
            patch.set(idx, image.get_pixel(row + di as i64, col + dj as i64));
        }
    }
}

fn parse_offset(token: &str) -> Result<i32> {
    if let Ok(v) = token.parse::<i32>() {
        return Ok(v);
    }
    match token.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && v.abs() <= i32::MAX as f64 => Ok(v as i32),
        _ => Err(CtxError::InvalidTemplate {
            message: format!("bad offset '{}'", token),
        }),
    }
}

impl fmt::Display for Template {
    /// Grid with each offset's index at its position.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(min_i) = self.offsets.iter().map(|o| o.0).min() else {
            return writeln!(f, "(empty template)");
        };
        let max_i = self.offsets.iter().map(|o| o.0).max().unwrap_or(min_i);
        let min_j = self.offsets.iter().map(|o| o.1).min().unwrap_or(0);
        let max_j = self.offsets.iter().map(|o| o.1).max().unwrap_or(min_j);

        write!(f, "    |")?;
        for j in min_j..=max_j {
            write!(f, " {:>3}", j)?;
        }
        writeln!(f)?;
        writeln!(f, "----+{}", "----".repeat((max_j - min_j + 1) as usize))?;
        for i in min_i..=max_i {
            write!(f, " {:>3}|", i)?;
            for j in min_j..=max_j {
                match self.offsets.iter().position(|&o| o == (i, j)) {
                    Some(idx) => write!(f, " {:>3}", idx)?,
                    None => write!(f, "    ")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
