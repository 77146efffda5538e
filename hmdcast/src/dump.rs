//! `hmdcast --subscribe`: print every received frame as one JSON line.
//!
//! ```text
//! {"topic":"hmd_streaming.world","width":640,"height":480,"index":0,
//!  "timestamp":0.52,"format":"rgb","projection_matrix":[...],
//!  "pixel_bytes":921600,"size_ok":true,"blake3":"9f0e..."}
//! ```

use std::io::Write;

use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};

use hmdcast_core::{FrameMetadata, StreamError, Subscriber, ThroughputWindow};

/// How often the receive rate is logged, in frames.
const RATE_LOG_EVERY: u64 = 100;

/// One received frame, ready for JSON output.
#[derive(Debug, Serialize)]
pub struct FrameSummary<'a> {
    #[serde(flatten)]
    pub metadata: FrameMetadata<'a>,
    pub pixel_bytes: usize,
    /// Pixel part length agrees with `width * height * 3`.
    pub size_ok: bool,
    /// Digest of the pixel part.
    pub blake3: String,
}

/// Decode the three parts of a frame message.
pub fn summarize(parts: &[Bytes]) -> Result<FrameSummary<'_>, StreamError> {
    let [topic, metadata, pixels] = parts else {
        return Err(StreamError::ProtocolViolation("frame message must have 3 parts"));
    };
    let metadata = FrameMetadata::decode(metadata)?;
    if metadata.topic.as_bytes() != &topic[..] {
        warn!(
            envelope = %String::from_utf8_lossy(topic),
            metadata = metadata.topic,
            "topic mismatch between envelope and metadata"
        );
    }

    Ok(FrameSummary {
        size_ok: pixels.len() == metadata.pixel_len(),
        pixel_bytes: pixels.len(),
        blake3: blake3::hash(pixels).to_hex().to_string(),
        metadata,
    })
}

/// Subscribe to `address` and print frames until the publisher goes away
/// or `limit` frames have been printed.
pub async fn run(
    address: &str,
    prefix: &str,
    limit: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut subscriber = Subscriber::connect(address).await?;
    subscriber.subscribe(prefix.as_bytes()).await?;
    info!(remote = %subscriber.remote(), prefix, "dumping frames");

    let mut window = ThroughputWindow::new();
    let mut received = 0u64;
    let stdout = std::io::stdout();

    while let Some(parts) = subscriber.recv().await? {
        window.record(parts.iter().map(|p| p.len() as u64).sum());
        received += 1;

        match summarize(&parts) {
            Ok(summary) => {
                let mut out = stdout.lock();
                serde_json::to_writer(&mut out, &summary)?;
                writeln!(out)?;
            }
            Err(e) => warn!(error = %e, parts = parts.len(), "undecodable message"),
        }

        if received % RATE_LOG_EVERY == 0 {
            info!(
                received,
                fps = format_args!("{:.1}", window.frames_per_sec()),
                bytes_per_sec = window.bytes_per_sec(),
                "receiving"
            );
        }
        if limit.is_some_and(|n| received >= n) {
            break;
        }
    }

    info!(received, "subscription ended");
    Ok(())
}
