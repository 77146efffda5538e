//! Clock sources.
//!
//! Rate gating uses application time; frame timestamps use real time
//! since startup. The two are kept apart so a host that pauses or scales
//! its application clock still stamps frames with wall-clock progress.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Time source consulted by the streamer.
pub trait Clock: Send + Sync {
    /// Application time in seconds. Drives the capture rate gate.
    fn time(&self) -> f64;

    /// Real time since startup in seconds. Stamped into frame metadata.
    fn realtime(&self) -> f32;
}

// ── SystemClock ──────────────────────────────────────────────────

/// Monotonic clock measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn realtime(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }
}

// ── ManualClock ──────────────────────────────────────────────────

/// A clock that only moves when told to. Useful for scripted hosts and
/// tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    time_bits: AtomicU64,
    realtime_bits: AtomicU32,
}

impl ManualClock {
    /// Start both clocks at `seconds`.
    pub fn starting_at(seconds: f64) -> Self {
        let clock = Self::default();
        clock.set(seconds);
        clock
    }

    /// Set application time and real time to the same value.
    pub fn set(&self, seconds: f64) {
        self.set_time(seconds);
        self.set_realtime(seconds as f32);
    }

    /// Set application time only.
    pub fn set_time(&self, seconds: f64) {
        self.time_bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    /// Set real time only.
    pub fn set_realtime(&self, seconds: f32) {
        self.realtime_bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    /// Move both clocks forward by `seconds`.
    pub fn advance(&self, seconds: f64) {
        self.set_time(self.time() + seconds);
        self.set_realtime(self.realtime() + seconds as f32);
    }
}

impl Clock for ManualClock {
    fn time(&self) -> f64 {
        f64::from_bits(self.time_bits.load(Ordering::SeqCst))
    }

    fn realtime(&self) -> f32 {
        f32::from_bits(self.realtime_bits.load(Ordering::SeqCst))
    }
}
