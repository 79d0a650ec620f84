//! 8-bit grayscale BMP codec
//!
//! This is the bit-exact boundary of the system: contributions arrive and the
//! aggregate leaves as real BMP files, so the header layout here must match
//! the standard exactly for interoperability with existing files.
//!
//! # File Layout
//!
//! ```text
//! [14 bytes: BITMAPFILEHEADER]["BM", file size, reserved, pixel offset]
//! [40 bytes: BITMAPINFOHEADER][width, height, planes, bpp, compression, ...]
//! [1024 bytes: palette        ][256 x BGRA entries, grayscale ramp]
//! [pixel array                ][bottom-up rows, each padded to 4 bytes]
//! ```
//!
//! Only uncompressed (BI_RGB) 8-bit files are supported. A negative height
//! in the info header means top-down row order and is accepted on decode;
//! encode always emits bottom-up rows.

use crate::raster::{DecodedRaster, RasterError, SampleGrid};

/// Minimum parseable header: BITMAPFILEHEADER + BITMAPINFOHEADER
pub const MIN_HEADER_SIZE: usize = 54;

/// Palette size for 8-bit files (256 four-byte BGRA entries)
const PALETTE_SIZE: usize = 1024;

/// Pixel array offset of a regenerated header
const CANONICAL_PIXEL_OFFSET: usize = MIN_HEADER_SIZE + PALETTE_SIZE;

fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn read_i32_le(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Bytes per stored row: width rounded up to a 4-byte multiple
fn row_stride(width: u32) -> usize {
    (width as usize + 3) & !3
}

/// Decode an 8-bit grayscale BMP into a sample grid
///
/// Returns the grid in top-down row order regardless of the file's stored
/// row order, plus the opaque header prefix (everything before the pixel
/// array) for pass-through use.
///
/// Fails with [`RasterError::Malformed`] on truncated input, a missing BM
/// signature, unsupported bit depth or compression, or declared dimensions
/// inconsistent with the remaining payload length.
pub fn decode(raw: &[u8]) -> Result<DecodedRaster, RasterError> {
    if raw.len() < MIN_HEADER_SIZE {
        return Err(RasterError::Malformed(format!(
            "file is {} bytes, minimum BMP header is {}",
            raw.len(),
            MIN_HEADER_SIZE
        )));
    }

    if &raw[0..2] != b"BM" {
        return Err(RasterError::Malformed(
            "missing BM signature".to_string(),
        ));
    }

    let pixel_offset = read_u32_le(raw, 10) as usize;
    let info_size = read_u32_le(raw, 14);
    if info_size < 40 {
        return Err(RasterError::Malformed(format!(
            "info header is {} bytes, expected at least 40",
            info_size
        )));
    }

    let width_raw = read_i32_le(raw, 18);
    if width_raw <= 0 {
        return Err(RasterError::Malformed(format!(
            "invalid width {}",
            width_raw
        )));
    }
    let width = width_raw as u32;

    let height_raw = read_i32_le(raw, 22);
    if height_raw == 0 {
        return Err(RasterError::Malformed("zero height".to_string()));
    }
    // Negative height means top-down row order
    let top_down = height_raw < 0;
    let height = height_raw.unsigned_abs();

    let bits_per_pixel = read_u16_le(raw, 28);
    if bits_per_pixel != 8 {
        return Err(RasterError::Malformed(format!(
            "unsupported bit depth {} (only 8-bit grayscale)",
            bits_per_pixel
        )));
    }

    let compression = read_u32_le(raw, 30);
    if compression != 0 {
        return Err(RasterError::Malformed(format!(
            "unsupported compression type {}",
            compression
        )));
    }

    if pixel_offset < MIN_HEADER_SIZE || pixel_offset > raw.len() {
        return Err(RasterError::Malformed(format!(
            "pixel array offset {} out of range for {}-byte file",
            pixel_offset,
            raw.len()
        )));
    }

    let stride = row_stride(width);
    let payload_len = stride
        .checked_mul(height as usize)
        .ok_or_else(|| RasterError::Malformed("pixel array size overflow".to_string()))?;
    let needed = pixel_offset
        .checked_add(payload_len)
        .ok_or_else(|| RasterError::Malformed("pixel array size overflow".to_string()))?;
    if raw.len() < needed {
        return Err(RasterError::Malformed(format!(
            "declared {}x{} grid needs {} bytes, got {}",
            width,
            height,
            needed,
            raw.len()
        )));
    }

    // Un-pad rows and normalize to top-down order
    let mut samples = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        let stored_row = if top_down { y } else { height - 1 - y };
        let start = pixel_offset + stored_row as usize * stride;
        samples.extend_from_slice(&raw[start..start + width as usize]);
    }

    let grid = SampleGrid::new(width, height, samples)?;
    let header = raw[..pixel_offset].to_vec();

    Ok(DecodedRaster { grid, header })
}

/// Encode a sample grid as an 8-bit grayscale BMP
///
/// The caller-supplied `template_header` (typically the header of a decoded
/// contribution) is reused when it is a valid 8-bit uncompressed header whose
/// declared dimensions match `grid`. Otherwise a canonical grayscale header
/// is regenerated, so the emitted file is never internally inconsistent.
/// The file-size field is rewritten in both cases.
pub fn encode(grid: &SampleGrid, template_header: &[u8]) -> Result<Vec<u8>, RasterError> {
    let (width, height) = grid.dimensions();
    let stride = row_stride(width);
    let payload_len = stride * height as usize;

    // Unreachable for grids built through the validating constructor
    if grid.samples().len() != width as usize * height as usize {
        return Err(RasterError::Encoding(format!(
            "sample buffer holds {} bytes for a {}x{} grid",
            grid.samples().len(),
            width,
            height
        )));
    }

    let header = if template_matches(template_header, grid) {
        template_header.to_vec()
    } else {
        canonical_header(grid)
    };

    let total_len = header.len() + payload_len;
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&header);

    // Patch the file-size field to the actual output length
    out[2..6].copy_from_slice(&(total_len as u32).to_le_bytes());

    // Bottom-up rows, zero padding
    let padding = [0u8; 3];
    for y in (0..height).rev() {
        out.extend_from_slice(grid.row(y));
        out.extend_from_slice(&padding[..stride - width as usize]);
    }

    Ok(out)
}

/// Check whether a template header can be reused as-is for this grid
///
/// Requires a complete pre-pixel prefix (the pixel offset must equal the
/// header length), matching bottom-up dimensions, 8 bpp, and no compression.
fn template_matches(header: &[u8], grid: &SampleGrid) -> bool {
    if header.len() < MIN_HEADER_SIZE || &header[0..2] != b"BM" {
        return false;
    }

    let pixel_offset = read_u32_le(header, 10) as usize;
    if pixel_offset != header.len() {
        return false;
    }

    read_i32_le(header, 18) == grid.width() as i32
        && read_i32_le(header, 22) == grid.height() as i32
        && read_u16_le(header, 28) == 8
        && read_u32_le(header, 30) == 0
}

/// Build a canonical 8-bit grayscale header (54 bytes + 1024-byte palette)
fn canonical_header(grid: &SampleGrid) -> Vec<u8> {
    let (width, height) = grid.dimensions();
    let payload_len = row_stride(width) * height as usize;
    let total_len = CANONICAL_PIXEL_OFFSET + payload_len;

    let mut header = Vec::with_capacity(CANONICAL_PIXEL_OFFSET);

    // BITMAPFILEHEADER
    header.extend_from_slice(b"BM");
    header.extend_from_slice(&(total_len as u32).to_le_bytes());
    header.extend_from_slice(&0u32.to_le_bytes()); // reserved
    header.extend_from_slice(&(CANONICAL_PIXEL_OFFSET as u32).to_le_bytes());

    // BITMAPINFOHEADER
    header.extend_from_slice(&40u32.to_le_bytes());
    header.extend_from_slice(&(width as i32).to_le_bytes());
    header.extend_from_slice(&(height as i32).to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // planes
    header.extend_from_slice(&8u16.to_le_bytes()); // bits per pixel
    header.extend_from_slice(&0u32.to_le_bytes()); // BI_RGB
    header.extend_from_slice(&(payload_len as u32).to_le_bytes());
    header.extend_from_slice(&2835i32.to_le_bytes()); // 72 DPI
    header.extend_from_slice(&2835i32.to_le_bytes());
    header.extend_from_slice(&256u32.to_le_bytes()); // colors used
    header.extend_from_slice(&0u32.to_le_bytes()); // important colors

    // Grayscale ramp palette (BGRA entries)
    for i in 0..=255u8 {
        header.extend_from_slice(&[i, i, i, 0]);
    }

    header
}
