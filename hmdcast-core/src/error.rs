//! Error types for the capture and publication pipeline.
//!
//! Structural failures (double bind, malformed address) are returned to
//! the caller. Per-frame failures (device readback, send) are absorbed by
//! the streamer, logged, and turned into a dropped frame.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// The canonical error type for hmdcast.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Endpoint Errors ──────────────────────────────────────────
    /// The connection string could not be parsed.
    #[error("invalid transport address {address:?}: {reason}")]
    InvalidAddress {
        address: String,
        reason: &'static str,
    },

    /// A second bind was attempted on an endpoint that is already bound.
    #[error("stream endpoint is already bound")]
    AlreadyBound,

    /// The endpoint was used before a connection notification bound it.
    #[error("stream endpoint is not bound")]
    NotBound,

    /// The endpoint has been torn down.
    #[error("stream endpoint is closed")]
    Closed,

    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer's greeting or READY command was rejected.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A frame violated the wire protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: usize },

    /// No subscriber accepted the message.
    #[error("send failed: {0}")]
    Send(String),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Capture Errors ───────────────────────────────────────────
    /// The rendering device failed to deliver pixels.
    #[error("readback failed: {0}")]
    Readback(String),

    /// A pixel payload did not match the frame buffer size.
    #[error("pixel payload has {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    /// Width or height is zero, or the buffer size overflows.
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// The render target does not have the startup dimensions.
    #[error("render target is {actual:?}, expected {expected:?}")]
    TargetMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of frame metadata failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::Other(s)
    }
}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        StreamError::Other(s.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StreamError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StreamError::Encoding(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StreamError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StreamError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = StreamError::InvalidAddress {
            address: "udp://x".into(),
            reason: "unsupported scheme",
        };
        assert!(e.to_string().contains("udp://x"));
        assert!(e.to_string().contains("unsupported scheme"));

        let e = StreamError::FrameSize {
            expected: 921_600,
            actual: 12,
        };
        assert!(e.to_string().contains("921600"));
        assert!(e.to_string().contains("12"));
    }

    #[test]
    fn from_string() {
        let e: StreamError = "something broke".into();
        assert!(matches!(e, StreamError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: StreamError = io_err.into();
        assert!(matches!(e, StreamError::Io(_)));
    }
}
