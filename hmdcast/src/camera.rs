//! Synthetic render source so the caster runs without a graphics device.
//!
//! [`PatternCamera`] draws an animated test pattern into a packed RGB
//! render target. Asynchronous readbacks are rendered on a blocking
//! worker thread and delivered through the oneshot channel, the way a
//! GPU driver completes a readback from its own context.
//!
//! [`MirrorTexture`] is the CPU-side copy of the streamed frame.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::trace;

use hmdcast_core::{
    BYTES_PER_PIXEL, PendingReadback, ProjectionMatrix, RenderCamera, StreamError, StreamTexture,
};

/// Test pattern drawn by [`PatternCamera`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    /// Red across, green down, blue pulsing with the frame counter.
    #[default]
    Gradient,
    /// Eight vertical color bars scrolling sideways.
    Bars,
}

const BAR_COLORS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

// ── PatternCamera ────────────────────────────────────────────────

pub struct PatternCamera {
    width: u32,
    height: u32,
    pattern: Pattern,
    frame: AtomicU64,
    projection: ProjectionMatrix,
}

impl PatternCamera {
    pub fn new(width: u32, height: u32, pattern: Pattern) -> Self {
        let aspect = width as f32 / height.max(1) as f32;
        Self {
            width,
            height,
            pattern,
            frame: AtomicU64::new(0),
            projection: perspective(60.0, aspect, 0.1, 100.0),
        }
    }

    /// Render the next frame of the animation.
    pub fn advance(&self) {
        self.frame.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

impl RenderCamera for PatternCamera {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn projection_matrix(&self) -> ProjectionMatrix {
        self.projection
    }

    fn read_pixels(&self, dst: &mut [u8]) -> hmdcast_core::Result<()> {
        if dst.len() != self.byte_len() {
            return Err(StreamError::FrameSize {
                expected: self.byte_len(),
                actual: dst.len(),
            });
        }
        render(self.pattern, self.width, self.height, self.frame(), dst);
        Ok(())
    }

    fn request_readback(&self) -> PendingReadback {
        let (tx, rx) = oneshot::channel();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            let _ = tx.send(Err(StreamError::Readback("no async runtime".into())));
            return rx;
        };

        let (pattern, width, height, frame) = (self.pattern, self.width, self.height, self.frame());
        let len = self.byte_len();
        runtime.spawn_blocking(move || {
            let mut pixels = vec![0u8; len];
            render(pattern, width, height, frame, &mut pixels);
            trace!(frame, "readback complete");
            // The receiver may have been abandoned; nothing to report.
            let _ = tx.send(Ok(Bytes::from(pixels)));
        });
        rx
    }
}

fn render(pattern: Pattern, width: u32, height: u32, frame: u64, dst: &mut [u8]) {
    let (w, h) = (width as usize, height as usize);
    let shift = frame as usize;
    for (i, px) in dst.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
        let (x, y) = (i % w, i / w);
        let rgb = match pattern {
            Pattern::Gradient => [
                ((x * 255) / w.max(1)) as u8,
                ((y * 255) / h.max(1)) as u8,
                (shift % 256) as u8,
            ],
            Pattern::Bars => {
                let bar = ((x + shift) % w) * BAR_COLORS.len() / w.max(1);
                BAR_COLORS[bar]
            }
        };
        px.copy_from_slice(&rgb);
    }
}

/// Column-major OpenGL-style perspective projection.
fn perspective(fov_y_deg: f32, aspect: f32, near: f32, far: f32) -> ProjectionMatrix {
    let f = 1.0 / (fov_y_deg.to_radians() / 2.0).tan();
    let mut m = [0.0; 16];
    m[0] = f / aspect;
    m[5] = f;
    m[10] = (far + near) / (near - far);
    m[11] = -1.0;
    m[14] = 2.0 * far * near / (near - far);
    m
}

// ── MirrorTexture ────────────────────────────────────────────────

/// CPU copy of the most recently captured frame.
#[derive(Default)]
pub struct MirrorTexture {
    pixels: Mutex<Vec<u8>>,
    applied: AtomicU64,
}

impl MirrorTexture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames committed so far.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Copy of the last committed frame.
    pub fn snapshot(&self) -> Vec<u8> {
        self.pixels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl StreamTexture for MirrorTexture {
    fn apply(&self, pixels: &[u8]) {
        let mut texture = self.pixels.lock().unwrap_or_else(|e| e.into_inner());
        texture.clear();
        texture.extend_from_slice(pixels);
        self.applied.fetch_add(1, Ordering::Relaxed);
    }
}
