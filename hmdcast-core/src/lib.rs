//! # hmdcast-core
//!
//! Capture-and-publish pipeline for a head-mounted display's world camera.
//!
//! This crate contains:
//! - **Frame**: `FrameBuffer`, `PixelFormat`, and the RGB → BGR converter
//! - **Capture**: `CaptureScheduler` rate gate, `Readback` over a `RenderCamera`, clocks
//! - **Publish**: `FramePublisher`, the MessagePack `FrameMetadata`, and counters
//! - **Transport**: `StreamEndpoint` (ZMTP 3.0 PUB socket) and `Subscriber`
//! - **Pipeline**: `FrameStreamer`, which drives all of the above per tick
//! - **Error**: `StreamError`, a typed, `thiserror`-based error hierarchy

pub mod capture;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod publish;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{
    CaptureScheduler, Clock, Completion, ManualClock, PendingReadback, Readback, ReadbackMode,
    RenderCamera, StreamTexture, SystemClock,
};
pub use error::{Result, StreamError};
pub use frame::{
    BYTES_PER_PIXEL, FrameBuffer, IDENTITY_PROJECTION, PixelFormat, ProjectionMatrix, to_bgr,
};
pub use pipeline::{CaptureConfig, ConnectionEvent, FrameStreamer, TickOutcome};
pub use publish::{
    FrameMetadata, FramePublisher, PublishStats, Published, StatsSnapshot, TOPIC,
    ThroughputWindow,
};
pub use transport::{
    AddressMode, DEFAULT_SEND_HIGH_WATER_MARK, EndpointOptions, EndpointState, StreamEndpoint,
    Subscriber, TransportAddress,
};
