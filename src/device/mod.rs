//! Depth sensor driver contract.
//!
//! A [`Device`] owns the hardware session. Completed frames are handed to the
//! callbacks registered before acquisition starts; the callbacks run on the
//! capture context that drives [`Device::process_events`].

pub mod synthetic;
pub mod udp;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use synthetic::{DepthPattern, SyntheticConfig, SyntheticDevice};
pub use udp::UdpDevice;

/// Depth frame width in samples
pub const FRAME_WIDTH: usize = 640;
/// Depth frame height in samples
pub const FRAME_HEIGHT: usize = 480;
/// Samples per depth frame
pub const FRAME_PIXELS: usize = FRAME_WIDTH * FRAME_HEIGHT;

/// Sentinel for "no return" in raw 11-bit mode
pub const RAW_NO_VALUE: u16 = 2047;
/// Sentinel for "no return" in millimetre and registered modes
pub const MM_NO_VALUE: u16 = 0;

/// Mechanical tilt range of the sensor head, degrees
pub const TILT_RANGE: (f32, f32) = (-30.0, 30.0);

/// Depth sample encoding produced by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthEncoding {
    /// Unprocessed 11-bit disparity values
    #[default]
    Raw11Bit,
    /// Depth in millimetres
    Millimeter,
    /// Depth in millimetres, registered to the colour camera
    Registered,
}

impl DepthEncoding {
    /// Reserved sample value meaning "no valid return"
    pub fn sentinel(self) -> u16 {
        match self {
            DepthEncoding::Raw11Bit => RAW_NO_VALUE,
            DepthEncoding::Millimeter | DepthEncoding::Registered => MM_NO_VALUE,
        }
    }
}

/// Video stream mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoMode {
    #[default]
    Rgb,
    Infrared,
}

impl VideoMode {
    /// Bytes per pixel delivered in this mode
    pub fn channels(self) -> usize {
        match self {
            VideoMode::Rgb => 3,
            VideoMode::Infrared => 1,
        }
    }
}

/// Status LED setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedMode {
    Off,
    #[default]
    Green,
    Red,
    Yellow,
    BlinkGreen,
    BlinkRedYellow,
}

/// Command applied to an open device by the capture context
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    SetDepthFormat(DepthEncoding),
    SetVideoFormat(VideoMode),
    SetTilt(f32),
    SetLed(LedMode),
}

/// Callback receiving one complete frame block and its capture time
pub type FrameCallback<T> = Box<dyn FnMut(&[T], Instant) + Send>;

/// Thread-safe handle that unblocks a pending [`Device::process_events`] call
#[derive(Clone)]
pub struct CancelHandle(Arc<dyn Fn() + Send + Sync>);

impl CancelHandle {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Request cancellation of the current (or next) blocking poll
    pub fn cancel(&self) {
        (self.0)()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelHandle")
    }
}

/// Depth sensor driver
pub trait Device: Send {
    /// Open the device session, failing with `DeviceUnavailable` if nothing
    /// answers within `timeout`
    fn open(&mut self, timeout: Duration) -> Result<()>;

    fn set_depth_format(&mut self, encoding: DepthEncoding) -> Result<()>;

    fn set_video_format(&mut self, mode: VideoMode) -> Result<()>;

    /// Tilt the sensor head, degrees
    fn set_tilt(&mut self, degrees: f32) -> Result<()>;

    fn set_led(&mut self, mode: LedMode) -> Result<()>;

    fn register_depth_callback(&mut self, callback: FrameCallback<u16>);

    fn register_color_callback(&mut self, callback: FrameCallback<u8>);

    /// Block until the driver has dispatched pending frames or the poll is
    /// cancelled through a [`CancelHandle`]. A cancel requested while no poll
    /// is pending makes the next poll return immediately.
    fn process_events(&mut self) -> Result<()>;

    fn cancel_handle(&self) -> CancelHandle;

    /// Release the device session
    fn close(&mut self) -> Result<()>;

    /// Apply a queued command
    fn apply(&mut self, command: DeviceCommand) -> Result<()> {
        match command {
            DeviceCommand::SetDepthFormat(encoding) => self.set_depth_format(encoding),
            DeviceCommand::SetVideoFormat(mode) => self.set_video_format(mode),
            DeviceCommand::SetTilt(degrees) => self.set_tilt(degrees),
            DeviceCommand::SetLed(mode) => self.set_led(mode),
        }
    }
}

/// Clamp a tilt request to the mechanical range
pub fn clamp_tilt(degrees: f32) -> f32 {
    degrees.clamp(TILT_RANGE.0, TILT_RANGE.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert_eq!(DepthEncoding::Raw11Bit.sentinel(), 2047);
        assert_eq!(DepthEncoding::Millimeter.sentinel(), 0);
        assert_eq!(DepthEncoding::Registered.sentinel(), 0);
    }

    #[test]
    fn test_clamp_tilt() {
        assert_eq!(clamp_tilt(45.0), 30.0);
        assert_eq!(clamp_tilt(-45.0), -30.0);
        assert_eq!(clamp_tilt(10.0), 10.0);
    }

    #[test]
    fn test_cancel_handle_invokes_closure() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let flag = Arc::new(AtomicBool::new(false));
        let inner = Arc::clone(&flag);
        let handle = CancelHandle::new(move || inner.store(true, Ordering::SeqCst));
        handle.clone().cancel();
        assert!(flag.load(Ordering::SeqCst));
    }
}
