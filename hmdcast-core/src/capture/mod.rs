//! Capture side of the pipeline: when to capture and how pixels are
//! acquired from the rendering device.
//!
//! | Module      | Purpose                                              |
//! |-------------|------------------------------------------------------|
//! | `clock`     | Application and real-time clock sources              |
//! | `scheduler` | Per-tick rate gate                                    |
//! | `readback`  | Sync/async pixel acquisition from a [`RenderCamera`] |

pub mod clock;
pub mod readback;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use readback::{
    Completion, PendingReadback, Readback, ReadbackMode, ReadbackRequest, RenderCamera,
    StreamTexture,
};
pub use scheduler::{CaptureScheduler, MIN_FRAME_RATE};
