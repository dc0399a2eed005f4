//! Bilevel bitmaps: storage, PBM input/output, comparison, median prefiltering
//! and a binary asymmetric channel.

use bitvec::order::Msb0;
use bitvec::prelude::*;
use log::debug;
use ndarray::Array2;
use rand::Rng;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::ctxshared::{u32_to_usize, usize_to_u32};
use crate::{CtxError, Result};

/// A bitmap image stored row-major, one bit per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitImage {
    /// Width of the bitmap in pixels
    pub width: usize,
    /// Height of the bitmap in pixels
    pub height: usize,
    bits: BitVec<u8, Msb0>,
}

impl BitImage {
    /// Largest accepted width or height
    pub const MAX_DIMENSION: usize = 1 << 24; // 16M pixels

    /// Creates a new blank bitmap with specified dimensions.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        for (name, value) in [("width", width), ("height", height)] {
            if value == 0 || u32_to_usize(value) > Self::MAX_DIMENSION {
                return Err(CtxError::InvalidImage {
                    message: format!("{} must be between 1 and {}", name, Self::MAX_DIMENSION),
                });
            }
        }
        let total_bits = u32_to_usize(width) * u32_to_usize(height);
        Ok(Self {
            width: u32_to_usize(width),
            height: u32_to_usize(height),
            bits: bitvec![u8, Msb0; 0; total_bits],
        })
    }

    /// Total number of pixels.
    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// True for a zero-sized image.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Pixel at (`row`, `col`); anything outside the image reads as 0, so patches
    /// near the borders are zero-padded.
    #[inline]
    pub fn get_pixel(&self, row: i64, col: i64) -> bool {
        if row < 0 || col < 0 || row as usize >= self.height || col as usize >= self.width {
            return false;
        }
        self.bits[row as usize * self.width + col as usize]
    }

    /// Sets the pixel at (`row`, `col`); writes outside the image are ignored.
    #[inline]
    pub fn set_pixel(&mut self, row: i64, col: i64, value: bool) {
        if row < 0 || col < 0 || row as usize >= self.height || col as usize >= self.width {
            return;
        }
        self.bits.set(row as usize * self.width + col as usize, value);
    }

    /// Pixel by linear (row-major) index.
    #[inline]
    pub fn get_linear(&self, idx: usize) -> bool {
        self.bits.get(idx).map_or(false, |b| *b)
    }

    /// Sets a pixel by linear (row-major) index.
    #[inline]
    pub fn set_linear(&mut self, idx: usize, value: bool) {
        if idx < self.bits.len() {
            self.bits.set(idx, value);
        }
    }

    /// Returns a view of the bitmap as a bit slice.
    pub fn as_bits(&self) -> &BitSlice<u8, Msb0> {
        &self.bits
    }

    /// Counts set bits (1s) in the bitmap.
    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    /// Performs a logical XOR with another bitmap.
    pub fn xor(&self, other: &Self) -> Self {
        assert_eq!(self.width, other.width, "Bitmaps must have the same width");
        assert_eq!(
            self.height, other.height,
            "Bitmaps must have the same height"
        );
        let mut result = self.clone();
        result.bits ^= &other.bits;
        result
    }

    /// Number of pixels at which two same-sized images differ.
    pub fn count_differences(&self, other: &Self) -> usize {
        self.xor(other).count_ones()
    }

    /// Converts to a 0/1 byte array.
    pub fn to_array(&self) -> Array2<u8> {
        Array2::from_shape_fn((self.height, self.width), |(r, c)| {
            self.bits[r * self.width + c] as u8
        })
    }
}

/// Converts an `ndarray::Array2<u8>` to a `BitImage`; any non-zero value is a 1.
pub fn array_to_bitimage(array: &Array2<u8>) -> Result<BitImage> {
    let (height, width) = array.dim();
    let mut bit_image = BitImage::new(usize_to_u32(width)?, usize_to_u32(height)?)?;
    for (y, row) in array.rows().into_iter().enumerate() {
        for (x, &pixel) in row.iter().enumerate() {
            if pixel > 0 {
                bit_image.set_pixel(y as i64, x as i64, true);
            }
        }
    }
    Ok(bit_image)
}

/// Builds an image from row-major 0/1 bytes.
pub fn bitimage_from_samples(width: usize, height: usize, samples: &[u8]) -> Result<BitImage> {
    let array = Array2::from_shape_vec((height, width), samples.to_vec())?;
    if let Some(bad) = array.iter().find(|&&v| v > 1) {
        return Err(CtxError::InvalidImage {
            message: format!("only binary images supported (found value {})", bad),
        });
    }
    array_to_bitimage(&array)
}

// ==============================================
// Comparison and prefiltering
// ==============================================

/// Pixel-wise confusion counts between a reference image and another image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageComparison {
    /// Pixels that are 0 in both images
    pub n00: usize,
    /// Pixels that are 0 in the reference and 1 in the other image
    pub n01: usize,
    /// Pixels that are 1 in the reference and 0 in the other image
    pub n10: usize,
    /// Pixels that are 1 in both images
    pub n11: usize,
    /// XOR of the two images: 1 wherever they differ
    pub diff: BitImage,
}

impl ImageComparison {
    /// Number of pixels.
    pub fn total(&self) -> usize {
        self.n00 + self.n01 + self.n10 + self.n11
    }

    /// Number of pixels at which the images differ.
    pub fn differences(&self) -> usize {
        self.n01 + self.n10
    }
}

/// Compares `other` against `reference` pixel by pixel.
pub fn compare_images(reference: &BitImage, other: &BitImage) -> Result<ImageComparison> {
    if reference.width != other.width || reference.height != other.height {
        return Err(CtxError::InvalidImage {
            message: format!(
                "cannot compare a {}x{} image with a {}x{} image",
                reference.width, reference.height, other.width, other.height
            ),
        });
    }
    let mut counts = [0usize; 4];
    for (a, b) in reference.bits.iter().by_vals().zip(other.bits.iter().by_vals()) {
        counts[((a as usize) << 1) | b as usize] += 1;
    }
    let [n00, n01, n10, n11] = counts;
    Ok(ImageComparison {
        n00,
        n01,
        n10,
        n11,
        diff: reference.xor(other),
    })
}

/// Binary median over a (2·`radius`+1)² window; windows are clamped to the image
/// by repeating the edge pixels. With an odd window the median is the majority.
pub fn median_filter(image: &BitImage, radius: usize) -> BitImage {
    if radius == 0 {
        return image.clone();
    }
    let (w, h) = (image.width, image.height);
    let window = (2 * radius + 1) * (2 * radius + 1);
    let mut out = image.clone();
    for y in 0..h {
        for x in 0..w {
            let mut ones = 0;
            for dy in 0..=2 * radius {
                let yy = (y + dy).saturating_sub(radius).min(h - 1);
                for dx in 0..=2 * radius {
                    let xx = (x + dx).saturating_sub(radius).min(w - 1);
                    ones += image.bits[yy * w + xx] as usize;
                }
            }
            out.bits.set(y * w + x, 2 * ones > window);
        }
    }
    debug!("Median filter radius {} on {}x{} image", radius, w, h);
    out
}

// ==============================================
// PBM input / output
// ==============================================

/// Splits a PNM header into tokens, skipping `#` comments.
struct HeaderReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> HeaderReader<'a> {
    fn skip_space(&mut self) {
        while self.pos < self.data.len() {
            match self.data[self.pos] {
                b'#' => {
                    while self.pos < self.data.len() && self.data[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                c if c.is_ascii_whitespace() => self.pos += 1,
                _ => break,
            }
        }
    }

    fn token(&mut self) -> Option<&'a [u8]> {
        self.skip_space();
        let data = self.data;
        let start = self.pos;
        while self.pos < data.len() && !data[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.pos > start {
            Some(&data[start..self.pos])
        } else {
            None
        }
    }

    fn number(&mut self, what: &str) -> Result<usize> {
        self.token()
            .and_then(|t| std::str::from_utf8(t).ok())
            .and_then(|t| t.parse::<usize>().ok())
            .ok_or_else(|| CtxError::InvalidImage {
                message: format!("invalid or missing {}", what),
            })
    }
}

/// Decodes a PBM image (P1 ASCII or P4 raw). A 1 bit is a black pixel.
///
/// The raster length is checked against the header before any pixel storage is
/// allocated.
pub fn decode_pbm(data: &[u8]) -> Result<BitImage> {
    let mut header = HeaderReader { data, pos: 0 };
    let magic = header.token().unwrap_or_default().to_vec();
    let width = header.number("width")?;
    let height = header.number("height")?;
    let too_large = || CtxError::InvalidImage {
        message: format!("PBM size {}x{} is too large", width, height),
    };

    match magic.as_slice() {
        b"P4" => {
            // exactly one whitespace byte separates the header from the raster
            let start = header.pos + 1;
            let bytes_per_row = (width + 7) / 8;
            let expected = bytes_per_row.checked_mul(height).ok_or_else(too_large)?;
            let available = data.len().saturating_sub(start);
            if available < expected {
                return Err(CtxError::InvalidImage {
                    message: format!(
                        "PBM raster too short: expected {} bytes, got {}",
                        expected, available
                    ),
                });
            }
            let mut image = BitImage::new(usize_to_u32(width)?, usize_to_u32(height)?)?;
            let raster = &data[start..start + expected];
            for (y, row) in raster.chunks(bytes_per_row).enumerate() {
                let bits = BitSlice::<u8, Msb0>::from_slice(row);
                for x in 0..width {
                    if bits[x] {
                        image.set_pixel(y as i64, x as i64, true);
                    }
                }
            }
            Ok(image)
        }
        b"P1" => {
            let total = width.checked_mul(height).ok_or_else(too_large)?;
            let body = &data[header.pos..];
            // every pixel takes at least one byte
            if body.len() < total {
                return Err(CtxError::InvalidImage {
                    message: format!("P1 raster has at most {} of {} pixels", body.len(), total),
                });
            }
            let mut image = BitImage::new(usize_to_u32(width)?, usize_to_u32(height)?)?;
            let mut idx = 0;
            for &byte in body {
                if idx == total {
                    break;
                }
                match byte {
                    b'0' => idx += 1,
                    b'1' => {
                        image.set_linear(idx, true);
                        idx += 1;
                    }
                    c if c.is_ascii_whitespace() => {}
                    other => {
                        return Err(CtxError::InvalidImage {
                            message: format!("unexpected byte 0x{:02x} in P1 raster", other),
                        })
                    }
                }
            }
            if idx != total {
                return Err(CtxError::InvalidImage {
                    message: format!("P1 raster has {} of {} pixels", idx, total),
                });
            }
            Ok(image)
        }
        other => Err(CtxError::InvalidImage {
            message: format!(
                "Unsupported PBM format: {}",
                String::from_utf8_lossy(other)
            ),
        }),
    }
}

/// Loads a PBM file into a BitImage
pub fn load_pbm<P: AsRef<Path>>(path: P) -> Result<BitImage> {
    let path = path.as_ref();
    let mut data = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut data)?;
    let image = decode_pbm(&data)?;
    debug!(
        "Loaded {}x{} PBM from {}",
        image.width,
        image.height,
        path.display()
    );
    Ok(image)
}

/// Writes a raw (P4) PBM.
pub fn write_pbm<W: Write>(image: &BitImage, out: &mut W) -> Result<()> {
    write!(out, "P4\n{} {}\n", image.width, image.height)?;
    let bytes_per_row = (image.width + 7) / 8;
    let mut row = vec![0u8; bytes_per_row];
    for y in 0..image.height {
        row.fill(0);
        let bits = BitSlice::<u8, Msb0>::from_slice_mut(&mut row);
        for x in 0..image.width {
            bits.set(x, image.bits[y * image.width + x]);
        }
        out.write_all(&row)?;
    }
    Ok(())
}

/// Saves a raw (P4) PBM file.
pub fn save_pbm<P: AsRef<Path>>(path: P, image: &BitImage) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_pbm(image, &mut out)?;
    out.flush()?;
    Ok(())
}

// ==============================================
// Binary asymmetric channel
// ==============================================

/// Passes `image` through a binary asymmetric channel flipping 0s with
/// probability `p01` and 1s with probability `p10`. Returns the noisy image and
/// the number of flipped pixels.
pub fn add_noise<R: Rng>(image: &BitImage, p01: f64, p10: f64, rng: &mut R) -> (BitImage, usize) {
    let mut out = image.clone();
    let mut flipped = 0;
    for idx in 0..image.len() {
        let x = image.get_linear(idx);
        let coin: f64 = rng.random();
        if (!x && coin < p01) || (x && coin < p10) {
            out.set_linear(idx, !x);
            flipped += 1;
        }
    }
    (out, flipped)
}
