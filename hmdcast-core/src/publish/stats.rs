//! Publication counters and a rolling throughput estimate.
//!
//! [`PublishStats`] is shared between the producer tick and readback
//! completion tasks, so every counter is atomic. [`ThroughputWindow`]
//! turns `(when, bytes)` samples into frames/second and bytes/second
//! over a sliding window; the service logs it periodically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// ── PublishStats ─────────────────────────────────────────────────

/// Running totals since startup.
#[derive(Debug, Default)]
pub struct PublishStats {
    published: AtomicU64,
    failed: AtomicU64,
    readback_failures: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Point-in-time copy of [`PublishStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Messages handed to the endpoint.
    pub published: u64,
    /// Messages the endpoint refused.
    pub failed: u64,
    /// Async readbacks that errored, were dropped, or timed out.
    pub readback_failures: u64,
    /// Bytes queued across all subscribers.
    pub bytes_sent: u64,
}

impl PublishStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self, bytes: usize, subscribers: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add((bytes * subscribers) as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_readback_failure(&self) {
        self.readback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            readback_failures: self.readback_failures.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Counter deltas since `earlier`.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.saturating_sub(earlier.published),
            failed: self.failed.saturating_sub(earlier.failed),
            readback_failures: self
                .readback_failures
                .saturating_sub(earlier.readback_failures),
            bytes_sent: self.bytes_sent.saturating_sub(earlier.bytes_sent),
        }
    }
}

// ── ThroughputWindow ─────────────────────────────────────────────

/// Rolling-window frame and byte rate.
pub struct ThroughputWindow {
    /// Samples: `(when, bytes)`, one per frame.
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    total_bytes: u64,
}

impl ThroughputWindow {
    /// A window spanning the last second.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(128),
            window,
            total_bytes: 0,
        }
    }

    /// Record one frame of `bytes` sent now.
    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    /// Record with an explicit timestamp.
    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        self.samples.push_back((when, bytes));
        self.total_bytes += bytes;
        self.evict(when);
    }

    /// Frames per second over the window.
    pub fn frames_per_sec(&self) -> f64 {
        match self.span() {
            Some(secs) => (self.samples.len() - 1) as f64 / secs,
            None => 0.0,
        }
    }

    /// Bytes per second over the window.
    pub fn bytes_per_sec(&self) -> u64 {
        match self.span() {
            Some(secs) => (self.total_bytes as f64 / secs) as u64,
            None => 0,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    // ── Internal ─────────────────────────────────────────────────

    /// Seconds between the oldest and newest sample; `None` with fewer
    /// than two samples or a zero span.
    fn span(&self) -> Option<f64> {
        let (first, _) = self.samples.front()?;
        let (last, _) = self.samples.back()?;
        let secs = last.duration_since(*first).as_secs_f64();
        (secs > 0.0).then_some(secs)
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, bytes)) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
                self.total_bytes = self.total_bytes.saturating_sub(bytes);
            } else {
                break;
            }
        }
    }
}

impl Default for ThroughputWindow {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = PublishStats::new();
        stats.record_published(100, 2);
        stats.record_published(100, 0);
        stats.record_failed();
        stats.record_readback_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.readback_failures, 1);
        assert_eq!(snap.bytes_sent, 200);
    }

    #[test]
    fn snapshot_delta() {
        let stats = PublishStats::new();
        stats.record_published(10, 1);
        let before = stats.snapshot();
        stats.record_published(10, 1);
        stats.record_published(10, 1);
        let delta = stats.snapshot().since(&before);
        assert_eq!(delta.published, 2);
        assert_eq!(delta.bytes_sent, 20);
    }

    #[test]
    fn empty_window_reports_zero() {
        let window = ThroughputWindow::new();
        assert_eq!(window.frames_per_sec(), 0.0);
        assert_eq!(window.bytes_per_sec(), 0);
    }

    #[test]
    fn thirty_frames_over_one_second() {
        let mut window = ThroughputWindow::with_window(Duration::from_secs(5));
        let t0 = Instant::now();
        for i in 0..=30u64 {
            window.record_at(t0 + Duration::from_millis(i * 1000 / 30), 1000);
        }
        let fps = window.frames_per_sec();
        assert!((fps - 30.0).abs() < 0.5, "fps = {fps}");
        assert!(window.bytes_per_sec() >= 30_000);
    }

    #[test]
    fn evicts_old_samples() {
        let mut window = ThroughputWindow::with_window(Duration::from_millis(500));
        let t0 = Instant::now();
        window.record_at(t0, 1000);
        window.record_at(t0 + Duration::from_secs(1), 500);
        assert_eq!(window.sample_count(), 1);
        assert_eq!(window.bytes_per_sec(), 0);
    }
}
