//! Configuration for skygrid
//!
//! Loaded from a TOML file. Every section is optional and falls back to the
//! defaults below.

use crate::device::{DepthEncoding, LedMode, SyntheticConfig, VideoMode};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub acquisition: AcquisitionConfig,
    pub calibration: CalibrationConfig,
    pub grid: GridConfig,
    pub viewer: ViewerConfig,
    pub logging: LoggingConfig,
}

/// Which sensor backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Synthetic,
    Udp,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub kind: DeviceKind,
    /// Local address the UDP backend listens on
    pub bind_address: String,
    pub synthetic: SyntheticConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Synthetic,
            bind_address: "0.0.0.0:56301".to_string(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl DeviceConfig {
    pub fn bind_address(&self) -> Result<SocketAddr> {
        self.bind_address
            .parse()
            .map_err(|e| Error::Config(format!("bind_address {:?}: {}", self.bind_address, e)))
    }
}

/// Capture settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub depth_encoding: DepthEncoding,
    pub video_mode: VideoMode,
    pub led: LedMode,
    pub tilt_degrees: f32,
    /// Time without a new depth frame before the signal counts as lost
    pub watchdog_ms: u64,
    /// Rolling window for frame rate measurement
    pub fps_window_ms: u64,
    /// How long `start` waits for the sensor to answer
    pub connect_timeout_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            depth_encoding: DepthEncoding::Raw11Bit,
            video_mode: VideoMode::Rgb,
            led: LedMode::Green,
            tilt_degrees: 0.0,
            watchdog_ms: 1000,
            fps_window_ms: 1000,
            connect_timeout_ms: 2000,
        }
    }
}

impl AcquisitionConfig {
    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn fps_window(&self) -> Duration {
        Duration::from_millis(self.fps_window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Back-projection parameters (see `cloud::Calibration`)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub aspect_ratio: f32,
    /// Nearest trusted depth, metres
    pub min_depth: f32,
    /// Farthest trusted depth, metres
    pub max_depth: f32,
    pub scale_factor: f32,
    pub registration_offset_mm: i32,
    /// Colour points by depth when no colour frame is available
    pub use_colour_map: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: 591.04 / 594.21,
            min_depth: 0.4,
            max_depth: 8.0,
            scale_factor: 1.0 / 591.04,
            registration_offset_mm: 0,
            use_colour_map: false,
        }
    }
}

/// Grid extent and tiling, metres
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GridConfig {
    pub front: f32,
    pub back: f32,
    pub left: f32,
    pub right: f32,
    pub rows: usize,
    pub cols: usize,
    /// Ignore points below this height
    pub min_height: Option<f32>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            front: 0.5,
            back: 4.0,
            left: -1.5,
            right: 1.5,
            rows: 3,
            cols: 3,
            min_height: None,
        }
    }
}

/// Viewer settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Draw every n-th point of the cloud
    pub point_skip: usize,
    pub draw_cloud: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            point_skip: 16,
            draw_cloud: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.device.synthetic.rate_hz <= 0.0 {
            return Err(Error::Config("synthetic rate_hz must be positive".into()));
        }
        if self.acquisition.watchdog_ms == 0 || self.acquisition.fps_window_ms == 0 {
            return Err(Error::Config("watchdog and fps window must be non-zero".into()));
        }
        if self.calibration.min_depth >= self.calibration.max_depth {
            return Err(Error::Config("min_depth must be below max_depth".into()));
        }
        if self.viewer.point_skip == 0 {
            return Err(Error::Config("point_skip must be at least 1".into()));
        }
        Ok(())
    }
}
