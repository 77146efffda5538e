//! Pixel storage for the in-flight frame.
//!
//! A [`FrameBuffer`] is allocated once from the startup dimensions and
//! reused for every frame: readback writes into it, the color converter
//! reads from it into the scratch buffer, and the publisher sends
//! whichever of the two matches the configured format.

use crate::error::{Result, StreamError};
use crate::frame::color;
use crate::frame::types::{BYTES_PER_PIXEL, PixelFormat};

/// Fixed-size RGB pixel buffer plus an equally sized BGR scratch buffer.
///
/// Invariant: `pixels.len() == scratch.len() == width * height * 3` for
/// the whole lifetime of the buffer.
#[derive(Debug)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    scratch: Vec<u8>,
}

impl FrameBuffer {
    /// Allocate storage for `width × height` packed 24-bit pixels.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let len = Self::byte_len_for(width, height)
            .ok_or(StreamError::InvalidDimensions { width, height })?;

        Ok(Self {
            width,
            height,
            pixels: vec![0; len],
            scratch: vec![0; len],
        })
    }

    /// Byte length of a `width × height` frame, `None` for empty or
    /// overflowing dimensions.
    pub fn byte_len_for(width: u32, height: u32) -> Option<usize> {
        if width == 0 || height == 0 {
            return None;
        }
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(BYTES_PER_PIXEL)
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Size of one frame in bytes.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Always `false`: zero dimensions are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// The captured RGB pixels.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Destination for a synchronous readback.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Copy an asynchronous readback payload into the buffer.
    ///
    /// The payload must be exactly one frame long; the buffer is never
    /// resized.
    pub fn load(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() != self.pixels.len() {
            return Err(StreamError::FrameSize {
                expected: self.pixels.len(),
                actual: payload.len(),
            });
        }
        self.pixels.copy_from_slice(payload);
        Ok(())
    }

    /// The bytes to put on the wire for `format`.
    ///
    /// For [`PixelFormat::Bgr`] the pixels are reordered into the scratch
    /// buffer first; for [`PixelFormat::Rgb`] the capture buffer is
    /// returned directly.
    pub fn payload(&mut self, format: PixelFormat) -> &[u8] {
        match format {
            PixelFormat::Rgb => &self.pixels,
            PixelFormat::Bgr => color::to_bgr(&self.pixels, &mut self.scratch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_three_bytes_per_pixel() {
        let buf = FrameBuffer::new(640, 480).unwrap();
        assert_eq!(buf.len(), 921_600);
        assert_eq!(buf.pixels().len(), 921_600);
        assert!(!buf.is_empty());
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(matches!(
            FrameBuffer::new(0, 480),
            Err(StreamError::InvalidDimensions { width: 0, height: 480 })
        ));
        assert!(FrameBuffer::new(640, 0).is_err());
    }

    #[test]
    fn load_requires_exact_length() {
        let mut buf = FrameBuffer::new(2, 2).unwrap();
        let err = buf.load(&[0u8; 11]).unwrap_err();
        assert!(matches!(
            err,
            StreamError::FrameSize {
                expected: 12,
                actual: 11
            }
        ));

        let payload: Vec<u8> = (0..12).collect();
        buf.load(&payload).unwrap();
        assert_eq!(buf.pixels(), payload.as_slice());
    }

    #[test]
    fn payload_reorders_only_for_bgr() {
        let mut buf = FrameBuffer::new(2, 1).unwrap();
        buf.load(&[1, 2, 3, 4, 5, 6]).unwrap();

        assert_eq!(buf.payload(PixelFormat::Rgb), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(buf.payload(PixelFormat::Bgr), &[3, 2, 1, 6, 5, 4]);
        // Capture buffer is untouched by the conversion.
        assert_eq!(buf.pixels(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn storage_is_reused_across_frames() {
        let mut buf = FrameBuffer::new(4, 4).unwrap();
        let pixels_ptr = buf.pixels().as_ptr();
        let scratch_ptr = buf.payload(PixelFormat::Bgr).as_ptr();

        buf.load(&[7u8; 48]).unwrap();
        assert_eq!(buf.pixels().as_ptr(), pixels_ptr);
        assert_eq!(buf.payload(PixelFormat::Bgr).as_ptr(), scratch_ptr);
    }
}
