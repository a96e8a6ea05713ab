//! Error types for skygrid

use crate::device::DepthEncoding;
use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// skygrid error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No sensor answered while opening the device session
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Watchdog expired without a new frame
    #[error("Signal lost: no new frame for {since:?}")]
    SignalLost {
        /// Time elapsed since the last frame (or since start)
        since: Duration,
    },

    /// Malformed grid bounds request
    #[error("Invalid grid extent: {0}")]
    InvalidExtent(String),

    /// Depth sample outside the legal range of its encoding
    #[error("Invalid depth sample {raw} for {encoding:?} encoding")]
    InvalidDepthSample {
        /// Raw sample value
        raw: u16,
        /// Encoding the sample was read with
        encoding: DepthEncoding,
    },

    /// Operation not supported by this device
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Point cloud file has the wrong shape or content
    #[error("Invalid point cloud file: {0}")]
    InvalidCloudFile(String),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// A worker thread panicked
    #[error("Thread panicked: {0}")]
    ThreadPanic(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
