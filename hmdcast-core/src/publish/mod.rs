//! Frame message assembly and bookkeeping.
//!
//! | Module      | Purpose                                          |
//! |-------------|--------------------------------------------------|
//! | `metadata`  | MessagePack metadata map and the frame topic     |
//! | `publisher` | Three-part message assembly and the frame index  |
//! | `stats`     | Counters and throughput for logging              |

pub mod metadata;
pub mod publisher;
pub mod stats;

pub use metadata::{FrameMetadata, TOPIC};
pub use publisher::{FramePublisher, Published};
pub use stats::{PublishStats, StatsSnapshot, ThroughputWindow};
