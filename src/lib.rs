//! Live capture sources behind a pull-based clip contract.
//!
//! A [`LiveClip`](clip::LiveClip) wraps a camera/microphone stream. A background
//! reader keeps the latest video frame in a single-slot buffer, and the
//! compositor pulls it with `tick()` on its own schedule.

pub mod capture;
pub mod clip;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{CaptureDevice, LiveStream, PixelFormat, Resolution, VideoFrame};
pub use clip::{Clip, ClipDuration, ClipMeta, LiveClip, TickResult, TickStatus};
pub use error::{CaptureError, ClipError};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// Where frames for the capture device come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Generated test pattern
    Pattern,
    /// V4L2 camera (requires the `v4l2` feature)
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Device label, or device path for V4L2 (empty to auto-detect)
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// V4L2 pixel format to request: "MJPG" or "RGB3"
    pub fourcc: String,
    pub buffer_count: u32,
    /// Frames queued per track subscription before new ones are dropped
    pub channel_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Pattern,
            device: "pattern0".into(),
            width: 1280,
            height: 720,
            fps: 30,
            fourcc: "MJPG".into(),
            buffer_count: 4,
            channel_depth: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How often the compositor ticks its clips
    pub tick_rate: u32,
    /// Ticks to run before shutting down, 0 to run until Ctrl-C
    pub run_ticks: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            run_ticks: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` takes precedence
    pub filter: String,
    pub uptime_timer: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "streamclip=debug".into(),
            uptime_timer: true,
        }
    }
}

impl Config {
    /// Defaults, overlaid by `path` (TOML) if given, overlaid by
    /// `STREAMCLIP__<SECTION>__<KEY>` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ClipError> {
        let config_error = |e: config::ConfigError| ClipError::Config(e.to_string());

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default()).map_err(config_error)?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix("STREAMCLIP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(config_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_overrides_from_toml() {
        let path = std::env::temp_dir().join(format!("streamclip-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[capture]\nwidth = 640\nheight = 360\n\n[pipeline]\ntick_rate = 25\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!((config.capture.width, config.capture.height), (640, 360));
        assert_eq!(config.capture.fps, 30);
        assert_eq!(config.capture.source, SourceKind::Pattern);
        assert_eq!(config.pipeline.tick_rate, 25);
        assert_eq!(config.logging.filter, "streamclip=debug");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/streamclip.toml"))).unwrap_err();
        assert!(matches!(err, ClipError::Config(_)));
    }

    #[test]
    fn global_config_can_be_swapped() {
        let mut config = Config::default();
        config.capture.fps = 15;
        CONFIG.store(std::sync::Arc::new(config));
        assert_eq!(CONFIG.load().capture.fps, 15);
        CONFIG.store(std::sync::Arc::new(Config::default()));
    }
}
