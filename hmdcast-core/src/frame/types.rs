//! Shared types for the capture/publish pipeline.

use std::fmt;
use std::str::FromStr;

use crate::error::StreamError;

/// Every streamed pixel is packed 8-bit RGB or BGR.
pub const BYTES_PER_PIXEL: usize = 3;

/// Camera projection, 16 floats in column-major order.
pub type ProjectionMatrix = [f32; 16];

/// The 4×4 identity matrix.
pub const IDENTITY_PROJECTION: ProjectionMatrix = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

// ── PixelFormat ──────────────────────────────────────────────────

/// Byte order of the pixel part on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// Red, Green, Blue. The render target's native layout.
    #[default]
    Rgb,
    /// Blue, Green, Red. Produced by reordering each 3-byte group.
    Bgr,
}

impl PixelFormat {
    /// Map the `in_bgr` configuration flag to a format.
    pub const fn from_bgr_flag(in_bgr: bool) -> Self {
        if in_bgr { PixelFormat::Bgr } else { PixelFormat::Rgb }
    }

    /// The value carried in the `format` metadata field.
    pub const fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Rgb => "rgb",
            PixelFormat::Bgr => "bgr",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rgb" => Ok(PixelFormat::Rgb),
            "bgr" => Ok(PixelFormat::Bgr),
            other => Err(StreamError::Encoding(format!("unknown pixel format {other:?}"))),
        }
    }
}
