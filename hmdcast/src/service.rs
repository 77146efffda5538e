//! Caster service core logic.
//!
//! Plays the host application: renders the synthetic camera at a fixed
//! rate, tells the pipeline where to publish, ticks it every frame, and
//! reports throughput until stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

use hmdcast_core::{ConnectionEvent, FrameStreamer, PublishStats, SystemClock};

use crate::camera::{MirrorTexture, PatternCamera};
use crate::config::CasterConfig;

/// How often throughput is logged.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

// ── CasterService ────────────────────────────────────────────────

/// The top-level caster service.
pub struct CasterService {
    config: CasterConfig,
    running: Arc<AtomicBool>,
}

impl CasterService {
    pub fn new(config: CasterConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task or a signal handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run the service until stopped.
    ///
    /// 1. Builds the camera, mirror texture and pipeline.
    /// 2. Delivers the connected notification for the configured address.
    /// 3. Renders and ticks at `render_fps` while reporting throughput.
    /// 4. Shuts the pipeline down when `running` becomes `false`.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.running.store(true, Ordering::SeqCst);

        let capture = self.config.to_capture_config();
        let camera = Arc::new(PatternCamera::new(
            capture.initial_width,
            capture.initial_height,
            self.config.source.pattern,
        ));
        let texture = Arc::new(MirrorTexture::new());
        let mut streamer = FrameStreamer::new(capture, camera.clone(), Arc::new(SystemClock::new()))?
            .with_texture(texture.clone())
            .with_endpoint_options(self.config.to_endpoint_options());

        let (events_tx, events_rx) = mpsc::channel(1);
        events_tx
            .send(ConnectionEvent::Connected {
                address: self.config.network.address.clone(),
            })
            .await?;

        let interval = self.config.render_interval();
        let render = tokio::spawn(render_loop(camera, interval, Arc::clone(&self.running)));
        let report = tokio::spawn(report_loop(
            streamer.stats_handle(),
            texture,
            Arc::clone(&self.running),
        ));

        let result = streamer
            .run(events_rx, interval, Arc::clone(&self.running))
            .await;

        self.running.store(false, Ordering::SeqCst);
        let _ = render.await;
        let _ = report.await;
        result?;

        info!("caster service stopped");
        Ok(())
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ── Internal ─────────────────────────────────────────────────────

/// Advance the animation once per render interval.
async fn render_loop(camera: Arc<PatternCamera>, interval: Duration, running: Arc<AtomicBool>) {
    let mut ticker = tokio::time::interval(interval);
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        camera.advance();
    }
}

/// Log published frame rate and bandwidth every [`REPORT_INTERVAL`].
async fn report_loop(stats: Arc<PublishStats>, texture: Arc<MirrorTexture>, running: Arc<AtomicBool>) {
    let mut last = stats.snapshot();
    let mut last_at = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(REPORT_INTERVAL) => {}
            _ = wait_for_stop(&running) => break,
        }

        let now = stats.snapshot();
        let delta = now.since(&last);
        let secs = last_at.elapsed().as_secs_f64();
        info!(
            fps = format_args!("{:.1}", delta.published as f64 / secs),
            mbps = format_args!("{:.2}", delta.bytes_sent as f64 * 8.0 / secs / 1e6),
            published = now.published,
            mirrored = texture.applied(),
            "streaming"
        );
        if delta.failed > 0 || delta.readback_failures > 0 {
            warn!(
                send_failures = delta.failed,
                readback_failures = delta.readback_failures,
                "frames dropped since last report"
            );
        }

        last = now;
        last_at = Instant::now();
    }
}

/// Async helper: resolves when `running` becomes false.
async fn wait_for_stop(running: &Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────
