//! Configuration for the frame caster.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hmdcast_core::{
    CaptureConfig, DEFAULT_SEND_HIGH_WATER_MARK, EndpointOptions, PixelFormat, ReadbackMode,
};

use crate::camera::Pattern;

/// Highest accepted `max_frame_rate`.
pub const MAX_FRAME_RATE: u32 = 120;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CasterConfig {
    /// Where frames are published.
    pub network: NetworkConfig,
    /// Capture and encoding settings.
    pub capture: CaptureSection,
    /// Synthetic render source.
    pub source: SourceConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Transport address, `[@|>]tcp://host:port`.
    pub address: String,
    /// Delay between connection attempts in connect mode (ms).
    pub reconnect_interval_ms: u64,
    /// Frames queued per subscriber before new ones are dropped for it.
    pub send_high_water_mark: usize,
}

/// Capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    /// Render target width in pixels.
    pub initial_width: u32,
    /// Render target height in pixels.
    pub initial_height: u32,
    /// Upper bound on frames per second (1..=120).
    pub max_frame_rate: u32,
    /// Publish pixels as BGR instead of RGB.
    pub in_bgr: bool,
    /// Use asynchronous readback.
    pub record_async: bool,
    /// Commit async readbacks to the stream texture.
    pub async_apply: bool,
    /// Abandon async readbacks after this long (ms). 0 waits forever.
    pub readback_deadline_ms: u64,
}

/// Synthetic render source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// How often the host renders and ticks the pipeline.
    pub render_fps: u32,
    /// Test pattern drawn into the render target.
    pub pattern: Pattern,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "tcp://127.0.0.1:5556".into(),
            reconnect_interval_ms: 100,
            send_high_water_mark: DEFAULT_SEND_HIGH_WATER_MARK,
        }
    }
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            initial_width: 640,
            initial_height: 480,
            max_frame_rate: 90,
            in_bgr: false,
            record_async: true,
            async_apply: true,
            readback_deadline_ms: 1000,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            render_fps: 90,
            pattern: Pattern::Gradient,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CasterConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Capture settings for the pipeline, with the frame rate clamped to
    /// `1..=MAX_FRAME_RATE`.
    pub fn to_capture_config(&self) -> CaptureConfig {
        let capture = &self.capture;
        CaptureConfig {
            initial_width: capture.initial_width,
            initial_height: capture.initial_height,
            max_frame_rate: capture.max_frame_rate.clamp(1, MAX_FRAME_RATE),
            format: PixelFormat::from_bgr_flag(capture.in_bgr),
            mode: ReadbackMode::from_async_flag(capture.record_async),
            async_apply: capture.async_apply,
            readback_deadline: (capture.readback_deadline_ms > 0)
                .then(|| Duration::from_millis(capture.readback_deadline_ms)),
        }
    }

    pub fn to_endpoint_options(&self) -> EndpointOptions {
        EndpointOptions {
            reconnect_interval: Duration::from_millis(self.network.reconnect_interval_ms.max(10)),
            send_high_water_mark: self.network.send_high_water_mark.max(1),
            ..EndpointOptions::default()
        }
    }

    /// Interval between host render ticks.
    pub fn render_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.source.render_fps.clamp(1, 1000) as f64)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&CasterConfig::default()).unwrap();
        assert!(text.contains("address"));
        assert!(text.contains("max_frame_rate"));
        assert!(text.contains("pattern = \"gradient\""));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&CasterConfig::default()).unwrap();
        let parsed: CasterConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.address, "tcp://127.0.0.1:5556");
        assert_eq!(parsed.capture.max_frame_rate, 90);
        assert!(parsed.capture.record_async);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: CasterConfig = toml::from_str(
            r#"
            [capture]
            in_bgr = true
            record_async = false
            "#,
        )
        .unwrap();
        assert!(parsed.capture.in_bgr);
        assert_eq!(parsed.capture.initial_width, 640);

        let capture = parsed.to_capture_config();
        assert_eq!(capture.format, PixelFormat::Bgr);
        assert_eq!(capture.mode, ReadbackMode::Sync);
    }

    #[test]
    fn to_capture_config_clamps() {
        let mut cfg = CasterConfig::default();
        cfg.capture.max_frame_rate = 500;
        assert_eq!(cfg.to_capture_config().max_frame_rate, MAX_FRAME_RATE);
        cfg.capture.max_frame_rate = 0;
        assert_eq!(cfg.to_capture_config().max_frame_rate, 1);
    }

    #[test]
    fn zero_deadline_disables_it() {
        let mut cfg = CasterConfig::default();
        assert_eq!(
            cfg.to_capture_config().readback_deadline,
            Some(Duration::from_secs(1))
        );
        cfg.capture.readback_deadline_ms = 0;
        assert_eq!(cfg.to_capture_config().readback_deadline, None);
    }

    #[test]
    fn high_water_mark_reaches_endpoint() {
        let mut cfg = CasterConfig::default();
        assert_eq!(
            cfg.to_endpoint_options().send_high_water_mark,
            DEFAULT_SEND_HIGH_WATER_MARK
        );
        cfg.network.send_high_water_mark = 0;
        assert_eq!(cfg.to_endpoint_options().send_high_water_mark, 1);
    }

    #[test]
    fn write_default_then_load() {
        let path = std::env::temp_dir().join(format!("hmdcast-{}.toml", std::process::id()));
        CasterConfig::write_default(&path).unwrap();
        let cfg = CasterConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.network.address, "tcp://127.0.0.1:5556");
        assert_eq!(cfg.capture.initial_width, 640);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = CasterConfig::load(Path::new("/nonexistent/hmdcast.toml"));
        assert_eq!(cfg.source.render_fps, 90);
    }
}
