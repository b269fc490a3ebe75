pub mod capture;
pub mod cli;
pub mod output;
pub mod pipeline;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::Frame;
pub use output::OutputSink;
pub use pipeline::{PlaybackHandle, Session, SessionReport};
pub use utils::MediaKind;

/// Process-wide settings, stored once at startup and readable from anywhere
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Settings>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Settings::default()));

/// Environment variable naming an explicit settings file
pub const CONFIG_PATH_ENV: &str = "VCAM_CONFIG";

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub output: OutputConfig,
    pub pipeline: PipelineConfig,
    pub pacing: PacingConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackend {
    /// Virtual camera driver reached through its interface library
    Driver,
    /// v4l2loopback device (Linux)
    V4l2,
    /// Discard every frame
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub backend: SinkBackend,
    pub width: u32,
    pub height: u32,
    pub driver_library: String,
    pub device_pattern: String,
    pub v4l2_device: String,
    pub require_device: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub default_fps: f64,
    pub drain_poll_ms: u64,
    /// Producer waits while this many frames are queued; `None` means unbounded
    pub max_queued_frames: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingConfig {
    pub correction_us: u64,
    pub spin_threshold_us: u64,
    pub stop_check_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusConfig {
    pub enabled: bool,
    pub refresh_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output: OutputConfig {
                backend: SinkBackend::Driver,
                width: 1280,
                height: 720,
                driver_library: "DriverInterface.dll".into(),
                device_pattern: r"@device:pnp:\\.*root.*unknown.*global".into(),
                v4l2_device: "/dev/video10".into(),
                require_device: false,
            },
            pipeline: PipelineConfig {
                default_fps: 30.0,
                drain_poll_ms: 20,
                max_queued_frames: None,
            },
            pacing: PacingConfig {
                correction_us: 50,
                spin_threshold_us: 2000,
                stop_check_ms: 50,
            },
            status: StatusConfig {
                enabled: true,
                refresh_ms: 100,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl Settings {
    /// Layer defaults, an optional TOML file and `VCAM_*` environment overrides
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Settings::default())?);

        builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("vcam").required(false)),
        };

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix("VCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.width == 0 || self.output.height == 0 {
            return Err(ConfigError::Invalid {
                key: "output",
                reason: format!("resolution {}x{}", self.output.width, self.output.height),
            });
        }
        if !(self.pipeline.default_fps > 0.0 && self.pipeline.default_fps.is_finite()) {
            return Err(ConfigError::Invalid {
                key: "pipeline.default_fps",
                reason: format!("{} is not a positive rate", self.pipeline.default_fps),
            });
        }
        if self.pipeline.max_queued_frames == Some(0) {
            return Err(ConfigError::Invalid {
                key: "pipeline.max_queued_frames",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.pipeline.drain_poll_ms.max(1))
    }
}
