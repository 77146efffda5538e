//! The capture → publish pipeline.
//!
//! [`FrameStreamer`] ties the pieces together:
//!
//! 1. A [`ConnectionEvent`] binds the [`StreamEndpoint`] exactly once.
//! 2. Each [`tick`](FrameStreamer::tick) consults the
//!    [`CaptureScheduler`] with the application clock.
//! 3. Sync mode reads pixels on the tick and publishes immediately.
//!    Async mode issues a readback stamped with the tick's real time
//!    and publishes from a completion task when the device answers.
//!
//! Loading the frame buffer, color conversion, metadata encoding, the
//! send and the index increment form one critical section behind a
//! `tokio::sync::Mutex`. Completions publish in the order they acquire
//! that lock.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::capture::{
    CaptureScheduler, Clock, Readback, ReadbackMode, ReadbackRequest, RenderCamera, StreamTexture,
};
use crate::error::{Result, StreamError};
use crate::frame::{FrameBuffer, PixelFormat, ProjectionMatrix};
use crate::publish::{FramePublisher, PublishStats, StatsSnapshot};
use crate::transport::{EndpointOptions, EndpointState, StreamEndpoint};

// ── CaptureConfig ────────────────────────────────────────────────

/// Startup configuration for [`FrameStreamer`].
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Render target width; fixed for the lifetime of the pipeline.
    pub initial_width: u32,
    /// Render target height; fixed for the lifetime of the pipeline.
    pub initial_height: u32,
    /// Upper bound on captures per second (clamped to at least 1).
    pub max_frame_rate: u32,
    /// Byte order of the pixel part.
    pub format: PixelFormat,
    /// Acquisition strategy.
    pub mode: ReadbackMode,
    /// Commit async readbacks to the stream texture before publishing.
    pub async_apply: bool,
    /// Abandon async readbacks that take longer than this.
    pub readback_deadline: Option<Duration>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            initial_width: 640,
            initial_height: 480,
            max_frame_rate: 90,
            format: PixelFormat::Rgb,
            mode: ReadbackMode::Async,
            async_apply: true,
            readback_deadline: Some(Duration::from_secs(1)),
        }
    }
}

// ── Events & outcomes ────────────────────────────────────────────

/// Notifications from the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The host knows where frames should go.
    Connected { address: String },
}

/// What a single producer step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No endpoint yet; nothing happened.
    NotConnected,
    /// Too soon after the previous capture.
    Throttled,
    /// A frame went out carrying this index.
    Published { index: u32 },
    /// A frame was captured or requested but not published.
    Dropped,
    /// An async readback was issued; it publishes on completion.
    Requested,
}

// ── FrameStreamer ────────────────────────────────────────────────

/// State guarded by the publication lock.
struct Publication {
    buffer: FrameBuffer,
    publisher: FramePublisher,
    endpoint: Option<StreamEndpoint>,
}

/// Captures frames from a [`RenderCamera`] and publishes them.
pub struct FrameStreamer {
    config: CaptureConfig,
    clock: Arc<dyn Clock>,
    texture: Option<Arc<dyn StreamTexture>>,
    readback: Readback,
    scheduler: CaptureScheduler,
    max_frame_rate: Arc<AtomicU32>,
    phase: EndpointState,
    endpoint_options: EndpointOptions,
    shared: Arc<Mutex<Publication>>,
    completions: JoinSet<TickOutcome>,
    stats: Arc<PublishStats>,
    reported_not_connected: bool,
}

impl FrameStreamer {
    /// Allocate the frame buffer and wire up the camera.
    ///
    /// Fails if the camera's render target does not match the configured
    /// dimensions.
    pub fn new(
        config: CaptureConfig,
        camera: Arc<dyn RenderCamera>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let expected = (config.initial_width, config.initial_height);
        let actual = camera.size();
        if actual != expected {
            return Err(StreamError::TargetMismatch { expected, actual });
        }

        let buffer = FrameBuffer::new(config.initial_width, config.initial_height)?;
        let readback =
            Readback::new(camera, config.mode).with_deadline(config.readback_deadline);
        let scheduler = CaptureScheduler::new(config.max_frame_rate);

        debug!(
            width = config.initial_width,
            height = config.initial_height,
            rate = scheduler.max_frame_rate(),
            format = %config.format,
            mode = ?config.mode,
            "frame streamer ready"
        );

        Ok(Self {
            max_frame_rate: Arc::new(AtomicU32::new(scheduler.max_frame_rate())),
            shared: Arc::new(Mutex::new(Publication {
                buffer,
                publisher: FramePublisher::new(config.format),
                endpoint: None,
            })),
            config,
            clock,
            texture: None,
            readback,
            scheduler,
            phase: EndpointState::Uninitialized,
            endpoint_options: EndpointOptions::default(),
            completions: JoinSet::new(),
            stats: Arc::new(PublishStats::new()),
            reported_not_connected: false,
        })
    }

    /// Commit captured pixels to `texture` before publishing.
    pub fn with_texture(mut self, texture: Arc<dyn StreamTexture>) -> Self {
        self.texture = Some(texture);
        self
    }

    pub fn with_endpoint_options(mut self, options: EndpointOptions) -> Self {
        self.endpoint_options = options;
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> EndpointState {
        self.phase
    }

    /// Shared handle for changing the frame rate at runtime. Values below
    /// 1 are treated as 1.
    pub fn max_frame_rate_handle(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.max_frame_rate)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> Arc<PublishStats> {
        Arc::clone(&self.stats)
    }

    /// Async readbacks issued but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.completions.len()
    }

    // ── Connection ───────────────────────────────────────────────

    /// Bind the endpoint to `address`. Only the first call succeeds.
    pub async fn on_connected(&mut self, address: &str) -> Result<()> {
        self.phase.check_bind()?;
        let endpoint = StreamEndpoint::bind(address, self.endpoint_options.clone()).await?;
        self.shared.lock().await.endpoint = Some(endpoint);
        self.phase.bind()?;
        info!(%address, "streaming endpoint bound");
        Ok(())
    }

    pub async fn handle_event(&mut self, event: ConnectionEvent) -> Result<()> {
        match event {
            ConnectionEvent::Connected { address } => self.on_connected(&address).await,
        }
    }

    /// Listening address when bound in bind mode.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .lock()
            .await
            .endpoint
            .as_ref()
            .and_then(StreamEndpoint::local_addr)
    }

    /// Poll until `count` subscribers have subscribed, or `limit` passes.
    pub async fn wait_for_subscribers(&self, count: usize, limit: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            {
                let mut guard = self.shared.lock().await;
                let endpoint = guard.endpoint.as_mut().ok_or(StreamError::NotBound)?;
                if endpoint.subscriber_count() >= count {
                    return Ok(());
                }
            }
            if start.elapsed() >= limit {
                return Err(StreamError::Timeout(limit));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    // ── Producer ─────────────────────────────────────────────────

    /// One producer step.
    ///
    /// Per-frame failures are counted and logged, never returned.
    pub async fn tick(&mut self) -> TickOutcome {
        self.reap();

        if !self.phase.is_bound() {
            if !self.reported_not_connected {
                warn!("capture requested before the endpoint is bound; skipping");
                self.reported_not_connected = true;
            } else {
                trace!("not connected; tick skipped");
            }
            return TickOutcome::NotConnected;
        }

        self.scheduler
            .set_max_frame_rate(self.max_frame_rate.load(Ordering::Relaxed));
        if !self.scheduler.should_capture(self.clock.time()) {
            return TickOutcome::Throttled;
        }

        match self.readback.mode() {
            ReadbackMode::Sync => self.capture_sync().await,
            ReadbackMode::Async => {
                let request = self.readback.request(self.clock.realtime());
                self.spawn_completion(request);
                TickOutcome::Requested
            }
        }
    }

    async fn capture_sync(&self) -> TickOutcome {
        let mut guard = self.shared.lock().await;
        let Publication {
            buffer,
            publisher,
            endpoint,
        } = &mut *guard;
        let Some(endpoint) = endpoint.as_mut() else {
            return TickOutcome::NotConnected;
        };

        if let Err(e) = self.readback.read_sync(buffer) {
            warn!(error = %e, "synchronous readback failed; frame dropped");
            self.stats.record_readback_failure();
            return TickOutcome::Dropped;
        }
        if let Some(texture) = &self.texture {
            texture.apply(buffer.pixels());
        }

        let timestamp = self.clock.realtime();
        let projection = self.readback.camera().projection_matrix();
        publish_frame(publisher, buffer, timestamp, projection, endpoint, &self.stats)
    }

    fn spawn_completion(&mut self, request: ReadbackRequest) {
        let shared = Arc::clone(&self.shared);
        let camera = Arc::clone(self.readback.camera());
        let texture = if self.config.async_apply {
            self.texture.clone()
        } else {
            None
        };
        let stats = Arc::clone(&self.stats);

        self.completions.spawn(async move {
            let completion = match request.wait().await {
                Ok(c) => c,
                Err(e) => {
                    debug!(error = %e, "async readback failed; frame dropped");
                    stats.record_readback_failure();
                    return TickOutcome::Dropped;
                }
            };

            let mut guard = shared.lock().await;
            let Publication {
                buffer,
                publisher,
                endpoint,
            } = &mut *guard;
            let Some(endpoint) = endpoint.as_mut() else {
                return TickOutcome::NotConnected;
            };

            if let Err(e) = buffer.load(&completion.data) {
                warn!(error = %e, "readback payload rejected; frame dropped");
                stats.record_readback_failure();
                return TickOutcome::Dropped;
            }
            if let Some(texture) = &texture {
                texture.apply(buffer.pixels());
            }

            let projection = camera.projection_matrix();
            publish_frame(
                publisher,
                buffer,
                completion.timestamp,
                projection,
                endpoint,
                &stats,
            )
        });
    }

    /// Collect finished completion tasks without waiting.
    fn reap(&mut self) {
        while let Some(result) = self.completions.try_join_next() {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!("completion task failed: {e}");
                }
            }
        }
    }

    /// Wait for every in-flight async readback and return what each did,
    /// in completion order.
    pub async fn drain(&mut self) -> Vec<TickOutcome> {
        let mut outcomes = Vec::with_capacity(self.completions.len());
        while let Some(result) = self.completions.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!("completion task failed: {e}"),
            }
        }
        outcomes
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Drive the pipeline until `running` is cleared: apply connection
    /// events as they arrive and tick every `frame_interval`.
    ///
    /// Structural failures from events (double bind, bad address) end the
    /// loop and are returned.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<ConnectionEvent>,
        frame_interval: Duration,
        running: Arc<AtomicBool>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            if !running.load(Ordering::SeqCst) {
                break Ok(());
            }
            tokio::select! {
                Some(event) = events.recv() => {
                    if let Err(e) = self.handle_event(event).await {
                        break Err(e);
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        };

        self.shutdown().await;
        result
    }

    /// Abort in-flight readbacks and close the endpoint. Terminal.
    pub async fn shutdown(&mut self) {
        self.completions.abort_all();
        self.drain().await;
        if let Some(mut endpoint) = self.shared.lock().await.endpoint.take() {
            endpoint.close();
        }
        self.phase.close();
        let stats = self.stats.snapshot();
        info!(
            published = stats.published,
            failed = stats.failed,
            readback_failures = stats.readback_failures,
            "frame streamer stopped"
        );
    }
}

fn publish_frame(
    publisher: &mut FramePublisher,
    buffer: &mut FrameBuffer,
    timestamp: f32,
    projection: ProjectionMatrix,
    endpoint: &mut StreamEndpoint,
    stats: &PublishStats,
) -> TickOutcome {
    match publisher.publish(buffer, timestamp, projection, endpoint) {
        Ok(published) => {
            stats.record_published(published.bytes, published.subscribers);
            TickOutcome::Published {
                index: published.index,
            }
        }
        Err(e) => {
            warn!(error = %e, "frame dropped: send failed");
            stats.record_failed();
            TickOutcome::Dropped
        }
    }
}
