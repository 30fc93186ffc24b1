//! Pixel-format descriptions and frame-geometry helpers.
//!
//! Mirrors what the capture driver reports per format: bit depth and
//! whether the layout is planar. Planar YUV strides are expressed in luma
//! bytes (one byte per pixel); packed formats derive bytes-per-line from
//! the depth, rounded up to an 8-byte boundary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Nv12,
    Nv21,
    Yuyv,
    Rgb32,
    Jpeg,
}

/// Static per-format properties used in buffer geometry math.
#[derive(Debug, Clone, Copy)]
pub struct FormatInfo {
    /// Bits per pixel across all planes.
    pub depth_bits: usize,
    /// Planar layouts compute strides on the luma plane only.
    pub planar: bool,
}

impl PixelFormat {
    pub fn info(self) -> FormatInfo {
        match self {
            PixelFormat::Nv12 | PixelFormat::Nv21 => FormatInfo {
                depth_bits: 12,
                planar: true,
            },
            PixelFormat::Yuyv => FormatInfo {
                depth_bits: 16,
                planar: false,
            },
            PixelFormat::Rgb32 => FormatInfo {
                depth_bits: 32,
                planar: false,
            },
            PixelFormat::Jpeg => FormatInfo {
                depth_bits: 8,
                planar: false,
            },
        }
    }
}

/// Round `value` up to a multiple of `align` (a power of two).
pub fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Bytes-per-line for `pixels` pixels of `format`.
pub fn pixels_to_bytes(format: PixelFormat, pixels: usize) -> usize {
    let info = format.info();
    if info.planar {
        // Planar YUV: stride counts luma bytes, chroma planes follow the
        // same stride per the format definition.
        pixels
    } else {
        align_up(info.depth_bits * pixels, 8) / 8
    }
}

/// Pixels representable in `bytes` bytes of one line of `format`.
pub fn bytes_to_pixels(format: PixelFormat, bytes: usize) -> usize {
    let info = format.info();
    if info.planar {
        bytes
    } else {
        (bytes * 8) / info.depth_bits
    }
}

/// Total frame size in bytes for the given geometry.
pub fn frame_size(format: PixelFormat, width: usize, height: usize) -> usize {
    height * align_up(format.info().depth_bits * width, 8) / 8
}

/// Stride-aware row copy between two buffers of the same logical geometry.
///
/// `row_bytes` is the payload width of each row; source and destination
/// strides may differ (display buffers are often padded wider than capture
/// buffers). Rows beyond either buffer's capacity are dropped with the
/// caller expected to have validated geometry first.
pub fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) {
    debug_assert!(row_bytes <= src_stride && row_bytes <= dst_stride);
    for row in 0..rows {
        let s = row * src_stride;
        let d = row * dst_stride;
        if s + row_bytes > src.len() || d + row_bytes > dst.len() {
            break;
        }
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}
