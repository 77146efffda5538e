//! Per-frame metadata map.
//!
//! Encoded as a MessagePack map with string keys, in this order:
//!
//! | Key                 | Type        | Value                              |
//! |---------------------|-------------|------------------------------------|
//! | `topic`             | str         | always [`TOPIC`]                   |
//! | `width`             | uint        | frame width in pixels              |
//! | `height`            | uint        | frame height in pixels             |
//! | `index`             | uint        | publication counter, from 0        |
//! | `timestamp`         | float32     | capture time in seconds            |
//! | `format`            | str         | `"rgb"` or `"bgr"`                 |
//! | `projection_matrix` | [float32;16]| column-major camera projection     |

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::{PixelFormat, ProjectionMatrix};

/// Topic of every frame message, and the first frame of each multipart.
pub const TOPIC: &str = "hmd_streaming.world";

/// Metadata describing one published frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata<'a> {
    pub topic: &'a str,
    pub width: u32,
    pub height: u32,
    pub index: u32,
    pub timestamp: f32,
    pub format: &'a str,
    pub projection_matrix: ProjectionMatrix,
}

impl<'a> FrameMetadata<'a> {
    pub fn new(
        width: u32,
        height: u32,
        index: u32,
        timestamp: f32,
        format: PixelFormat,
        projection_matrix: ProjectionMatrix,
    ) -> Self {
        Self {
            topic: TOPIC,
            width,
            height,
            index,
            timestamp,
            format: format.as_str(),
            projection_matrix,
        }
    }

    /// Replace the contents of `out` with the encoded map.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        rmp_serde::encode::write_named(out, self)?;
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(128);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Decode a metadata frame. Borrowed strings point into `bytes`.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// The pixel layout named by `format`.
    pub fn pixel_format(&self) -> Result<PixelFormat> {
        self.format.parse()
    }

    /// Size of the pixel frame this metadata announces.
    pub fn pixel_len(&self) -> usize {
        self.width as usize * self.height as usize * crate::frame::BYTES_PER_PIXEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::IDENTITY_PROJECTION;

    fn sample() -> FrameMetadata<'static> {
        FrameMetadata::new(640, 480, 7, 1.5, PixelFormat::Bgr, IDENTITY_PROJECTION)
    }

    #[test]
    fn encodes_as_named_map() {
        let bytes = sample().to_vec().unwrap();
        // fixmap with 7 entries
        assert_eq!(bytes[0], 0x87);
        // first key: fixstr "topic"
        assert_eq!(&bytes[1..7], b"\xa5topic");
        // first value: fixstr of the 19-byte topic
        assert_eq!(bytes[7], 0xa0 | TOPIC.len() as u8);
        assert_eq!(&bytes[8..8 + TOPIC.len()], TOPIC.as_bytes());
    }

    #[test]
    fn keys_in_fixed_order() {
        let bytes = sample().to_vec().unwrap();
        let text = String::from_utf8_lossy(&bytes);
        let keys = [
            "topic",
            "width",
            "height",
            "index",
            "timestamp",
            "format",
            "projection_matrix",
        ];
        let positions: Vec<usize> = keys.iter().map(|k| text.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    }

    #[test]
    fn timestamp_is_float32() {
        let bytes = sample().to_vec().unwrap();
        let key = b"\xa9timestamp";
        let at = bytes.windows(key.len()).position(|w| w == key).unwrap() + key.len();
        assert_eq!(bytes[at], 0xca);
        assert_eq!(&bytes[at + 1..at + 5], &1.5f32.to_be_bytes());
    }

    #[test]
    fn decode_reads_back_fields() {
        let bytes = sample().to_vec().unwrap();
        let meta = FrameMetadata::decode(&bytes).unwrap();
        assert_eq!(meta, sample());
        assert_eq!(meta.pixel_format().unwrap(), PixelFormat::Bgr);
        assert_eq!(meta.pixel_len(), 640 * 480 * 3);
    }

    #[test]
    fn encode_into_reuses_buffer() {
        let mut buf = vec![0xff; 4];
        sample().encode_into(&mut buf).unwrap();
        assert_eq!(buf[0], 0x87);
        let len = buf.len();
        sample().encode_into(&mut buf).unwrap();
        assert_eq!(buf.len(), len);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(FrameMetadata::decode(&[0xc1, 0x00]).is_err());
    }
}
