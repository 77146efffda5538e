//! Pixel acquisition from the rendering device.
//!
//! Two strategies are supported:
//!
//! - **Sync**: [`RenderCamera::read_pixels`] blocks the producer tick
//!   and writes straight into the frame buffer.
//! - **Async**: [`RenderCamera::request_readback`] returns immediately
//!   with a [`PendingReadback`]. The device resolves it later from any
//!   execution context; a dropped sender means the device gave up.
//!
//! The async request carries the real-time value of the tick that
//! issued it, so a frame is stamped with its capture time and not with
//! the time its completion happened to be observed.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{Result, StreamError};
use crate::frame::{FrameBuffer, ProjectionMatrix};

/// Completion half of an asynchronous readback.
pub type PendingReadback = oneshot::Receiver<Result<Bytes>>;

// ── Device traits ────────────────────────────────────────────────

/// The camera whose render target is streamed.
pub trait RenderCamera: Send + Sync + 'static {
    /// Render target size in pixels.
    fn size(&self) -> (u32, u32);

    /// Current projection, column-major. Read on every publish.
    fn projection_matrix(&self) -> ProjectionMatrix;

    /// Blocking read of the rendered image as packed RGB into `dst`.
    fn read_pixels(&self, dst: &mut [u8]) -> Result<()>;

    /// Issue a non-blocking readback of the rendered image as packed RGB.
    fn request_readback(&self) -> PendingReadback;
}

/// CPU-side texture that mirrors the streamed frame for other consumers.
///
/// `apply` commits freshly captured pixels to it.
pub trait StreamTexture: Send + Sync + 'static {
    fn apply(&self, pixels: &[u8]);
}

// ── ReadbackMode ─────────────────────────────────────────────────

/// Acquisition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadbackMode {
    /// Blocking read on the producer tick.
    Sync,
    /// Request on the tick, publish on completion.
    #[default]
    Async,
}

impl ReadbackMode {
    /// Map the `record_async` configuration flag to a mode.
    pub const fn from_async_flag(record_async: bool) -> Self {
        if record_async { ReadbackMode::Async } else { ReadbackMode::Sync }
    }
}

// ── Completion ───────────────────────────────────────────────────

/// A finished asynchronous readback.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Raw RGB payload from the device.
    pub data: Bytes,
    /// Real time of the tick that issued the request.
    pub timestamp: f32,
}

/// An issued asynchronous readback.
#[derive(Debug)]
pub struct ReadbackRequest {
    pending: PendingReadback,
    timestamp: f32,
    deadline: Option<Duration>,
}

impl ReadbackRequest {
    /// Real time of the tick that issued the request.
    pub fn timestamp(&self) -> f32 {
        self.timestamp
    }

    /// Wait for the device.
    ///
    /// Fails with [`StreamError::Readback`] if the device reports an
    /// error or drops the request, and with [`StreamError::Timeout`] if a
    /// deadline is set and passes first.
    pub async fn wait(self) -> Result<Completion> {
        let outcome = match self.deadline {
            Some(limit) => tokio::time::timeout(limit, self.pending)
                .await
                .map_err(|_| StreamError::Timeout(limit))?,
            None => self.pending.await,
        };

        let data = outcome
            .map_err(|_| StreamError::Readback("device dropped the request".into()))??;

        Ok(Completion {
            data,
            timestamp: self.timestamp,
        })
    }
}

// ── Readback ─────────────────────────────────────────────────────

/// Front end over a [`RenderCamera`] for both acquisition strategies.
pub struct Readback {
    camera: Arc<dyn RenderCamera>,
    mode: ReadbackMode,
    deadline: Option<Duration>,
}

impl Readback {
    pub fn new(camera: Arc<dyn RenderCamera>, mode: ReadbackMode) -> Self {
        Self {
            camera,
            mode,
            deadline: None,
        }
    }

    /// Abandon async requests that take longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn mode(&self) -> ReadbackMode {
        self.mode
    }

    pub fn camera(&self) -> &Arc<dyn RenderCamera> {
        &self.camera
    }

    /// Synchronous capture into the frame buffer.
    pub fn read_sync(&self, buffer: &mut FrameBuffer) -> Result<()> {
        self.camera.read_pixels(buffer.pixels_mut())
    }

    /// Issue an asynchronous capture stamped with `timestamp`.
    pub fn request(&self, timestamp: f32) -> ReadbackRequest {
        ReadbackRequest {
            pending: self.camera.request_readback(),
            timestamp,
            deadline: self.deadline,
        }
    }
}
