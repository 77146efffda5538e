//! Capture rate gate.

/// Lowest accepted frame rate; smaller values are clamped up to it.
pub const MIN_FRAME_RATE: u32 = 1;

/// Decides once per tick whether a new capture starts.
///
/// A capture passes the gate when at least `1 / max_frame_rate` seconds
/// have elapsed since the previous accepted capture. The first query
/// always passes.
#[derive(Debug, Clone)]
pub struct CaptureScheduler {
    max_frame_rate: u32,
    last_capture: Option<f64>,
}

impl CaptureScheduler {
    pub fn new(max_frame_rate: u32) -> Self {
        Self {
            max_frame_rate: max_frame_rate.max(MIN_FRAME_RATE),
            last_capture: None,
        }
    }

    /// Change the rate; takes effect on the next query.
    pub fn set_max_frame_rate(&mut self, max_frame_rate: u32) {
        self.max_frame_rate = max_frame_rate.max(MIN_FRAME_RATE);
    }

    pub fn max_frame_rate(&self) -> u32 {
        self.max_frame_rate
    }

    /// Minimum spacing between captures, in seconds.
    pub fn interval(&self) -> f64 {
        1.0 / self.max_frame_rate as f64
    }

    /// Time of the last accepted capture.
    pub fn last_capture(&self) -> Option<f64> {
        self.last_capture
    }

    /// Returns `true` and records `now` if the interval has elapsed;
    /// otherwise returns `false` without touching any state.
    pub fn should_capture(&mut self, now: f64) -> bool {
        match self.last_capture {
            Some(last) if now - last < self.interval() => false,
            _ => {
                self.last_capture = Some(now);
                true
            }
        }
    }
}
