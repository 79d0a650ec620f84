//! Raster types and the BMP codec
//!
//! This module translates between the on-disk BMP representation and an
//! in-memory grid of 8-bit grayscale samples. It has no networking or
//! aggregation concerns: `decode` and `encode` are pure functions over their
//! inputs.

pub mod bmp;

use thiserror::Error;

/// Errors produced by the raster codec
#[derive(Debug, Error)]
pub enum RasterError {
    /// Input bytes are not a parseable 8-bit grayscale BMP
    #[error("malformed raster: {0}")]
    Malformed(String),

    /// Sample grid cannot be serialized
    ///
    /// Defensive only: unreachable for grids built through the validating
    /// `SampleGrid` constructors, since u8 samples are 0-255 by type.
    #[error("cannot encode raster: {0}")]
    Encoding(String),
}

/// A row-major, top-down grid of 8-bit grayscale samples
///
/// The constructor enforces that the sample buffer exactly covers
/// `width * height` pixels, so every `SampleGrid` in circulation is
/// internally consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleGrid {
    width: u32,
    height: u32,
    samples: Vec<u8>,
}

impl SampleGrid {
    /// Create a grid from a flat row-major sample buffer
    ///
    /// # Arguments
    ///
    /// * `width` - Grid width in pixels (must be nonzero)
    /// * `height` - Grid height in pixels (must be nonzero)
    /// * `samples` - Row-major, top-down samples; length must be width * height
    pub fn new(width: u32, height: u32, samples: Vec<u8>) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::Malformed(format!(
                "invalid dimensions {}x{}",
                width, height
            )));
        }

        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(RasterError::Malformed(format!(
                "sample buffer holds {} bytes, {}x{} grid needs {}",
                samples.len(),
                width,
                height,
                expected
            )));
        }

        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// Create a grid from nested rows (top-down)
    ///
    /// Convenient for tests and small fixtures. All rows must have the same
    /// length.
    pub fn from_rows(rows: &[Vec<u8>]) -> Result<Self, RasterError> {
        let height = rows.len() as u32;
        let width = rows.first().map(|r| r.len()).unwrap_or(0) as u32;

        for (y, row) in rows.iter().enumerate() {
            if row.len() as u32 != width {
                return Err(RasterError::Malformed(format!(
                    "row {} has {} samples, expected {}",
                    y,
                    row.len(),
                    width
                )));
            }
        }

        let samples = rows.concat();
        Self::new(width, height, samples)
    }

    /// Grid width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// (width, height) pair
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Flat row-major sample buffer
    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    /// Sample at (x, y), with (0, 0) the top-left pixel
    ///
    /// # Panics
    ///
    /// Panics if the coordinate is outside the grid.
    pub fn sample(&self, x: u32, y: u32) -> u8 {
        assert!(x < self.width && y < self.height, "coordinate out of grid");
        self.samples[y as usize * self.width as usize + x as usize]
    }

    /// One row of samples (top-down index)
    pub fn row(&self, y: u32) -> &[u8] {
        let w = self.width as usize;
        let start = y as usize * w;
        &self.samples[start..start + w]
    }
}

/// A decoded raster: sample grid plus the opaque source header
///
/// `header` is everything in the source file before the pixel array (file
/// header, info header, palette). It is preserved for pass-through
/// compatibility and never interpreted by the aggregation math.
#[derive(Debug, Clone)]
pub struct DecodedRaster {
    /// Decoded sample grid
    pub grid: SampleGrid,

    /// Opaque format header preceding the pixel payload
    pub header: Vec<u8>,
}
