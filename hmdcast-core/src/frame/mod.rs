//! Frame storage and pixel layout.
//!
//! | Module   | Purpose                                               |
//! |----------|-------------------------------------------------------|
//! | `types`  | Pixel format and projection types shared by the crate |
//! | `buffer` | Fixed-size pixel buffer plus BGR scratch space        |
//! | `color`  | RGB → BGR channel reorder                             |

pub mod buffer;
pub mod color;
pub mod types;

pub use buffer::FrameBuffer;
pub use color::to_bgr;
pub use types::{BYTES_PER_PIXEL, IDENTITY_PROJECTION, PixelFormat, ProjectionMatrix};
