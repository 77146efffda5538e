//! Assembles and sends one frame message.
//!
//! ```text
//!  ┌──────────────────────┬──────────────────────┬────────────────────┐
//!  │ part 0: topic (utf8) │ part 1: metadata map │ part 2: pixels     │
//!  │ "hmd_streaming.world"│ MessagePack          │ width*height*3     │
//!  └──────────────────────┴──────────────────────┴────────────────────┘
//! ```

use tracing::trace;

use crate::error::Result;
use crate::frame::{FrameBuffer, PixelFormat, ProjectionMatrix};
use crate::publish::metadata::{FrameMetadata, TOPIC};
use crate::transport::{Multipart, StreamEndpoint};

/// Result of a successful publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    /// Index carried in the metadata.
    pub index: u32,
    /// Subscribers the message was queued for.
    pub subscribers: usize,
    /// Bytes queued per subscriber, frame headers included.
    pub bytes: usize,
}

/// Largest index carried on the wire; the metadata field is an int32.
pub const MAX_INDEX: u32 = i32::MAX as u32;

/// Index following `index`, wrapping to 0 after [`MAX_INDEX`].
pub fn next_index(index: u32) -> u32 {
    if index >= MAX_INDEX { 0 } else { index + 1 }
}

/// Owns the frame counter and the reusable metadata buffer.
///
/// The counter starts at 0 and advances by exactly one per message
/// handed to the endpoint, so a failed send does not consume an index.
#[derive(Debug)]
pub struct FramePublisher {
    index: u32,
    format: PixelFormat,
    metadata: Vec<u8>,
}

impl FramePublisher {
    pub fn new(format: PixelFormat) -> Self {
        Self {
            index: 0,
            format,
            metadata: Vec::with_capacity(192),
        }
    }

    /// Publish the frame currently in `buffer`.
    pub fn publish(
        &mut self,
        buffer: &mut FrameBuffer,
        timestamp: f32,
        projection: ProjectionMatrix,
        endpoint: &mut StreamEndpoint,
    ) -> Result<Published> {
        let index = self.index;
        FrameMetadata::new(
            buffer.width(),
            buffer.height(),
            index,
            timestamp,
            self.format,
            projection,
        )
        .encode_into(&mut self.metadata)?;

        let pixels = buffer.payload(self.format);
        let parts: [&[u8]; 3] = [TOPIC.as_bytes(), &self.metadata, pixels];
        let message = Multipart::new(&parts);
        let bytes = message.encoded_len();
        let subscribers = endpoint.send(message)?;

        self.index = next_index(index);
        trace!(index, timestamp, subscribers, "frame published");
        Ok(Published {
            index,
            subscribers,
            bytes,
        })
    }
}
