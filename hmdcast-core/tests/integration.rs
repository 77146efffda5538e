//! Integration tests: full capture → publish → subscribe round-trips
//! over a real TCP connection on localhost.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use hmdcast_core::{
    CaptureConfig, EndpointOptions, FrameMetadata, FrameStreamer, IDENTITY_PROJECTION, ManualClock,
    PendingReadback, PixelFormat, ProjectionMatrix, ReadbackMode, RenderCamera, StreamError,
    Subscriber, TOPIC, TickOutcome,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// ── Helpers ──────────────────────────────────────────────────────

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// Camera with a deterministic, non-symmetric pixel pattern. Async
/// requests are answered by the test through [`complete_next`].
#[derive(Default)]
struct PatternCamera {
    pending: Mutex<Vec<oneshot::Sender<hmdcast_core::Result<Bytes>>>>,
}

impl PatternCamera {
    fn pattern() -> Vec<u8> {
        (0..(WIDTH * HEIGHT) as usize)
            .flat_map(|i| [(i % 251) as u8, (i % 13) as u8 * 7, 200])
            .collect()
    }

    fn complete_next(&self) {
        self.complete(0);
    }

    /// Answer the `slot`-th outstanding request.
    fn complete(&self, slot: usize) {
        let tx = self.pending.lock().unwrap().remove(slot);
        tx.send(Ok(Bytes::from(Self::pattern()))).unwrap();
    }
}

impl RenderCamera for PatternCamera {
    fn size(&self) -> (u32, u32) {
        (WIDTH, HEIGHT)
    }

    fn projection_matrix(&self) -> ProjectionMatrix {
        let mut m = IDENTITY_PROJECTION;
        m[10] = -1.002;
        m[14] = -0.2002;
        m
    }

    fn read_pixels(&self, dst: &mut [u8]) -> hmdcast_core::Result<()> {
        dst.copy_from_slice(&Self::pattern());
        Ok(())
    }

    fn request_readback(&self) -> PendingReadback {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push(tx);
        rx
    }
}

fn config(format: PixelFormat, mode: ReadbackMode) -> CaptureConfig {
    CaptureConfig {
        initial_width: WIDTH,
        initial_height: HEIGHT,
        max_frame_rate: 90,
        format,
        mode,
        ..CaptureConfig::default()
    }
}

/// A bound streamer plus one subscriber listening on `prefix`.
async fn streamer_with_subscriber(
    format: PixelFormat,
    mode: ReadbackMode,
    prefix: &[u8],
) -> (FrameStreamer, Subscriber, Arc<PatternCamera>, Arc<ManualClock>) {
    streamer_with_options(format, mode, prefix, EndpointOptions::default()).await
}

async fn streamer_with_options(
    format: PixelFormat,
    mode: ReadbackMode,
    prefix: &[u8],
    options: EndpointOptions,
) -> (FrameStreamer, Subscriber, Arc<PatternCamera>, Arc<ManualClock>) {
    let camera = Arc::new(PatternCamera::default());
    let clock = Arc::new(ManualClock::default());
    let mut streamer = FrameStreamer::new(config(format, mode), camera.clone(), clock.clone())
        .unwrap()
        .with_endpoint_options(options);

    streamer.on_connected("@tcp://127.0.0.1:0").await.unwrap();
    let addr = streamer.local_addr().await.unwrap();

    let mut subscriber = Subscriber::connect(&format!("tcp://{addr}")).await.unwrap();
    subscriber.subscribe(prefix).await.unwrap();
    streamer
        .wait_for_subscribers(1, Duration::from_secs(5))
        .await
        .unwrap();

    (streamer, subscriber, camera, clock)
}

/// Read `count` frames on a separate task. Frames are large enough to
/// fill the socket buffers, so the reader must run while the streamer
/// publishes.
fn collect(
    mut subscriber: Subscriber,
    count: usize,
) -> JoinHandle<(Subscriber, Vec<Vec<Bytes>>)> {
    tokio::spawn(async move {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            let parts = tokio::time::timeout(Duration::from_secs(5), subscriber.recv())
                .await
                .expect("timeout")
                .unwrap()
                .expect("publisher closed");
            frames.push(parts);
        }
        (subscriber, frames)
    })
}

// ── Sync capture ─────────────────────────────────────────────────

#[tokio::test]
async fn test_sync_rgb_two_frames() {
    let (mut streamer, sub, _camera, clock) =
        streamer_with_subscriber(PixelFormat::Rgb, ReadbackMode::Sync, TOPIC.as_bytes()).await;
    let reader = collect(sub, 2);

    clock.set(0.0);
    assert_eq!(streamer.tick().await, TickOutcome::Published { index: 0 });
    clock.set(0.02);
    assert_eq!(streamer.tick().await, TickOutcome::Published { index: 1 });

    let (_sub, frames) = reader.await.unwrap();
    for (expected_index, parts) in frames.iter().enumerate() {
        assert_eq!(parts.len(), 3);
        assert_eq!(&parts[0][..], TOPIC.as_bytes());

        let meta = FrameMetadata::decode(&parts[1]).unwrap();
        assert_eq!(meta.topic, TOPIC);
        assert_eq!(meta.width, WIDTH);
        assert_eq!(meta.height, HEIGHT);
        assert_eq!(meta.index, expected_index as u32);
        assert_eq!(meta.format, "rgb");
        assert_eq!(meta.projection_matrix[10], -1.002);

        assert_eq!(parts[2].len(), 921_600);
        assert_eq!(&parts[2][..], &PatternCamera::pattern()[..]);
    }

    let stats = streamer.stats();
    assert_eq!(stats.published, 2);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_sync_bgr_swaps_channels() {
    let (mut streamer, sub, _camera, clock) =
        streamer_with_subscriber(PixelFormat::Bgr, ReadbackMode::Sync, b"").await;
    let reader = collect(sub, 1);

    clock.set(0.0);
    streamer.tick().await;

    let (_sub, frames) = reader.await.unwrap();
    let parts = &frames[0];
    let meta = FrameMetadata::decode(&parts[1]).unwrap();
    assert_eq!(meta.format, "bgr");
    assert_eq!(meta.pixel_format().unwrap(), PixelFormat::Bgr);

    let rgb = PatternCamera::pattern();
    let bgr = &parts[2];
    assert_eq!(bgr.len(), rgb.len());
    for (src, dst) in rgb.chunks_exact(3).zip(bgr.chunks_exact(3)) {
        assert_eq!(dst, &[src[2], src[1], src[0]]);
    }
}

#[tokio::test]
async fn test_throttled_tick_sends_nothing() {
    let (mut streamer, sub, _camera, clock) =
        streamer_with_subscriber(PixelFormat::Rgb, ReadbackMode::Sync, b"").await;
    let reader = collect(sub, 1);

    clock.set(0.0);
    streamer.tick().await;
    clock.set(0.005);
    assert_eq!(streamer.tick().await, TickOutcome::Throttled);

    let (mut sub, _frames) = reader.await.unwrap();
    let second = tokio::time::timeout(Duration::from_millis(200), sub.recv()).await;
    assert!(second.is_err(), "no second frame expected");
}

// ── Async capture ────────────────────────────────────────────────

#[tokio::test]
async fn test_async_frame_keeps_request_timestamp() {
    let (mut streamer, sub, camera, clock) =
        streamer_with_subscriber(PixelFormat::Rgb, ReadbackMode::Async, b"").await;
    let reader = collect(sub, 1);

    clock.set(5.0);
    assert_eq!(streamer.tick().await, TickOutcome::Requested);

    clock.set(5.033);
    camera.complete_next();
    assert_eq!(streamer.drain().await, vec![TickOutcome::Published { index: 0 }]);

    let (_sub, frames) = reader.await.unwrap();
    let meta = FrameMetadata::decode(&frames[0][1]).unwrap();
    assert_eq!(meta.timestamp, 5.0);
    assert_eq!(meta.index, 0);
}

#[tokio::test]
async fn test_async_failure_does_not_consume_index() {
    let (mut streamer, sub, camera, clock) =
        streamer_with_subscriber(PixelFormat::Rgb, ReadbackMode::Async, b"").await;
    let reader = collect(sub, 1);

    clock.set(0.0);
    streamer.tick().await;
    let tx = camera.pending.lock().unwrap().remove(0);
    tx.send(Err(StreamError::Readback("gpu lost".into()))).unwrap();
    assert_eq!(streamer.drain().await, vec![TickOutcome::Dropped]);

    clock.set(1.0);
    streamer.tick().await;
    camera.complete_next();
    streamer.drain().await;

    let (_sub, frames) = reader.await.unwrap();
    let meta = FrameMetadata::decode(&frames[0][1]).unwrap();
    assert_eq!(meta.index, 0);
    assert_eq!(meta.timestamp, 1.0);
    assert_eq!(streamer.stats().readback_failures, 1);
}

#[tokio::test]
async fn test_async_completions_out_of_order() {
    let (mut streamer, sub, camera, clock) =
        streamer_with_subscriber(PixelFormat::Rgb, ReadbackMode::Async, b"").await;
    let reader = collect(sub, 2);

    clock.set(1.0);
    assert_eq!(streamer.tick().await, TickOutcome::Requested);
    clock.set(2.0);
    assert_eq!(streamer.tick().await, TickOutcome::Requested);
    assert_eq!(streamer.in_flight(), 2);

    // The later request finishes first.
    camera.complete(1);
    tokio::time::timeout(Duration::from_secs(5), async {
        while streamer.stats().published < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timeout");
    camera.complete(0);
    assert_eq!(
        streamer.drain().await,
        vec![
            TickOutcome::Published { index: 0 },
            TickOutcome::Published { index: 1 }
        ]
    );

    let (_sub, frames) = reader.await.unwrap();
    let wire: Vec<(u32, f32)> = frames
        .iter()
        .map(|parts| {
            let meta = FrameMetadata::decode(&parts[1]).unwrap();
            (meta.index, meta.timestamp)
        })
        .collect();
    assert_eq!(wire, vec![(0, 2.0), (1, 1.0)]);
}

// ── Slow subscribers ─────────────────────────────────────────────

/// Tick once per 20 ms of clock time, pausing briefly so the writer task
/// can fill the socket, until a frame is dropped. Returns the outcomes.
async fn tick_until_dropped(
    streamer: &mut FrameStreamer,
    clock: &ManualClock,
    slowest_tick: &mut Duration,
) -> Vec<TickOutcome> {
    let mut outcomes = Vec::new();
    for step in 0..500 {
        clock.set(step as f64 * 0.02);
        let started = Instant::now();
        let outcome = streamer.tick().await;
        *slowest_tick = (*slowest_tick).max(started.elapsed());
        outcomes.push(outcome);
        if outcome == TickOutcome::Dropped {
            return outcomes;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("stalled subscriber never filled its queue");
}

#[tokio::test]
async fn test_send_failure_does_not_consume_index() {
    let options = EndpointOptions {
        send_high_water_mark: 1,
        ..EndpointOptions::default()
    };
    let (mut streamer, sub, _camera, clock) =
        streamer_with_options(PixelFormat::Rgb, ReadbackMode::Sync, b"", options).await;

    let mut slowest = Duration::ZERO;
    let outcomes = tick_until_dropped(&mut streamer, &clock, &mut slowest).await;
    let published = outcomes.len() as u32 - 1;
    for (i, outcome) in outcomes[..outcomes.len() - 1].iter().enumerate() {
        assert_eq!(*outcome, TickOutcome::Published { index: i as u32 });
    }
    assert_eq!(streamer.stats().failed, 1);
    assert_eq!(streamer.stats().published, published as u64);

    // Reading resumes; the next frame continues the sequence.
    let reader = collect(sub, published as usize + 1);
    let mut step = outcomes.len();
    let next = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            step += 1;
            clock.set(step as f64 * 0.02);
            match streamer.tick().await {
                TickOutcome::Published { index } => break index,
                _ => tokio::time::sleep(Duration::from_millis(2)).await,
            }
        }
    })
    .await
    .expect("timeout");
    assert_eq!(next, published);

    let (_sub, frames) = reader.await.unwrap();
    let indices: Vec<u32> = frames
        .iter()
        .map(|parts| FrameMetadata::decode(&parts[1]).unwrap().index)
        .collect();
    let expected: Vec<u32> = (0..=published).collect();
    assert_eq!(indices, expected);
}

#[tokio::test]
async fn test_stalled_subscriber_neither_blocks_nor_detaches() {
    let (mut streamer, sub, _camera, clock) =
        streamer_with_subscriber(PixelFormat::Rgb, ReadbackMode::Sync, b"").await;

    let mut slowest = Duration::ZERO;
    tick_until_dropped(&mut streamer, &clock, &mut slowest).await;
    assert!(
        slowest < Duration::from_millis(500),
        "tick waited {slowest:?} on a stalled subscriber"
    );

    // Still attached: the queued frames arrive once it reads again.
    streamer
        .wait_for_subscribers(1, Duration::ZERO)
        .await
        .unwrap();
    let (_sub, frames) = collect(sub, 1).await.unwrap();
    assert_eq!(FrameMetadata::decode(&frames[0][1]).unwrap().index, 0);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let (mut streamer, mut sub, _camera, clock) =
        streamer_with_subscriber(PixelFormat::Rgb, ReadbackMode::Sync, TOPIC.as_bytes()).await;

    sub.unsubscribe(TOPIC.as_bytes()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    clock.set(0.0);
    assert_eq!(streamer.tick().await, TickOutcome::Published { index: 0 });
    let nothing = tokio::time::timeout(Duration::from_millis(200), sub.recv()).await;
    assert!(nothing.is_err(), "unsubscribed peer must not receive frames");
    assert_eq!(streamer.stats().bytes_sent, 0);
}

// ── Endpoint ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_tick_before_connect_is_noop() {
    let camera = Arc::new(PatternCamera::default());
    let clock = Arc::new(ManualClock::default());
    let mut streamer = FrameStreamer::new(
        config(PixelFormat::Rgb, ReadbackMode::Async),
        camera.clone(),
        clock,
    )
    .unwrap();

    assert_eq!(streamer.tick().await, TickOutcome::NotConnected);
    assert!(camera.pending.lock().unwrap().is_empty());
    assert_eq!(streamer.stats().published, 0);
}

#[tokio::test]
async fn test_double_connect_fails() {
    let (mut streamer, sub, _camera, clock) =
        streamer_with_subscriber(PixelFormat::Rgb, ReadbackMode::Sync, b"").await;
    let reader = collect(sub, 1);

    let err = streamer.on_connected("tcp://127.0.0.1:0").await.unwrap_err();
    assert!(matches!(err, StreamError::AlreadyBound));

    // The original endpoint keeps working.
    clock.set(0.0);
    assert_eq!(streamer.tick().await, TickOutcome::Published { index: 0 });
    let (_sub, frames) = reader.await.unwrap();
    assert_eq!(frames.len(), 1);
}

#[tokio::test]
async fn test_connect_mode_dials_subscriber() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let camera = Arc::new(PatternCamera::default());
    let clock = Arc::new(ManualClock::default());
    let mut streamer = FrameStreamer::new(
        config(PixelFormat::Rgb, ReadbackMode::Sync),
        camera,
        clock.clone(),
    )
    .unwrap();
    streamer
        .on_connected(&format!(">tcp://127.0.0.1:{port}"))
        .await
        .unwrap();
    assert!(streamer.local_addr().await.is_none());

    let mut sub = Subscriber::accept(&listener).await.unwrap();
    sub.subscribe(TOPIC.as_bytes()).await.unwrap();
    streamer
        .wait_for_subscribers(1, Duration::from_secs(5))
        .await
        .unwrap();
    let reader = collect(sub, 1);

    clock.set(0.0);
    assert_eq!(streamer.tick().await, TickOutcome::Published { index: 0 });
    let (_sub, frames) = reader.await.unwrap();
    assert_eq!(&frames[0][0][..], TOPIC.as_bytes());
}

#[tokio::test]
async fn test_topic_filter_excludes_other_prefixes() {
    let (mut streamer, mut sub, _camera, clock) =
        streamer_with_subscriber(PixelFormat::Rgb, ReadbackMode::Sync, b"gaze").await;

    clock.set(0.0);
    assert_eq!(streamer.tick().await, TickOutcome::Published { index: 0 });

    let nothing = tokio::time::timeout(Duration::from_millis(200), sub.recv()).await;
    assert!(nothing.is_err(), "filtered subscriber must not receive frames");
    assert_eq!(streamer.stats().bytes_sent, 0);
}

#[tokio::test]
async fn test_shutdown_closes_subscriber_stream() {
    let (mut streamer, mut sub, _camera, _clock) =
        streamer_with_subscriber(PixelFormat::Rgb, ReadbackMode::Sync, b"").await;

    streamer.shutdown().await;
    let end = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timeout");
    assert!(matches!(end, Ok(None) | Err(_)));
}
