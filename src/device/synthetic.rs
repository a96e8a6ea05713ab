//! In-process sensor producing frames at a fixed rate.
//!
//! Used by the tests and by the binary when no hardware is configured.

use super::{
    clamp_tilt, CancelHandle, DepthEncoding, Device, FrameCallback, LedMode, VideoMode,
    FRAME_PIXELS, FRAME_WIDTH,
};
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Depth content generated for each frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum DepthPattern {
    /// Every sample carries the same value
    Constant(u16),
    /// Every sample carries the frame sequence number (wrapped below 2047)
    SequenceMarker,
    /// A floor plane receding from the sensor with a box in the middle
    Scene,
}

/// Synthetic sensor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Frames per second delivered on each stream
    pub rate_hz: f32,
    pub pattern: DepthPattern,
    /// Deliver colour frames alongside depth
    pub color: bool,
    /// Open succeeds but no frame is ever delivered
    pub silent: bool,
    /// Open fails with `DeviceUnavailable`
    pub unavailable: bool,
    /// Stop delivering after this many frames
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30.0,
            pattern: DepthPattern::Scene,
            color: true,
            silent: false,
            unavailable: false,
            frame_limit: None,
        }
    }
}

struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Sensor that fabricates depth and colour frames on a timer
pub struct SyntheticDevice {
    config: SyntheticConfig,
    interval: Duration,
    is_open: bool,
    encoding: DepthEncoding,
    video_mode: VideoMode,
    tilt: f32,
    depth_callback: Option<FrameCallback<u16>>,
    color_callback: Option<FrameCallback<u8>>,
    cancel: Arc<CancelState>,
    next_due: Option<Instant>,
    sequence: u64,
    depth_block: Vec<u16>,
    color_block: Vec<u8>,
    close_count: Arc<AtomicUsize>,
}

impl SyntheticDevice {
    pub fn new(config: SyntheticConfig) -> Self {
        let interval = Duration::from_secs_f32(1.0 / config.rate_hz.max(0.1));
        Self {
            config,
            interval,
            is_open: false,
            encoding: DepthEncoding::default(),
            video_mode: VideoMode::default(),
            tilt: 0.0,
            depth_callback: None,
            color_callback: None,
            cancel: Arc::new(CancelState {
                cancelled: Mutex::new(false),
                wake: Condvar::new(),
            }),
            next_due: None,
            sequence: 0,
            depth_block: vec![0; FRAME_PIXELS],
            color_block: Vec::new(),
            close_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter incremented by every effective `close`
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_count)
    }

    pub fn tilt(&self) -> f32 {
        self.tilt
    }

    /// Wait for the next frame deadline. Returns false when cancelled.
    fn wait_until_due(&mut self) -> bool {
        let now = Instant::now();
        let mut due = *self.next_due.get_or_insert(now);
        if due + self.interval < now {
            // Fell behind; resynchronise instead of bursting
            due = now;
        }

        let mut cancelled = self.cancel.cancelled.lock();
        while !*cancelled && Instant::now() < due {
            self.cancel.wake.wait_until(&mut cancelled, due);
        }
        if *cancelled {
            *cancelled = false;
            return false;
        }
        drop(cancelled);

        self.next_due = Some(due + self.interval);
        true
    }

    fn limit_reached(&self) -> bool {
        self.config
            .frame_limit
            .is_some_and(|limit| self.sequence >= limit)
    }
}

fn fill_depth(block: &mut [u16], pattern: DepthPattern, encoding: DepthEncoding, sequence: u64) {
    match pattern {
        DepthPattern::Constant(value) => block.fill(value),
        DepthPattern::SequenceMarker => block.fill((sequence % 2047) as u16),
        DepthPattern::Scene => {
            for (i, sample) in block.iter_mut().enumerate() {
                let (px, py) = (i % FRAME_WIDTH, i / FRAME_WIDTH);
                // Distance in mm: a box straight ahead, floor in the lower half, nothing above
                let mm: Option<u32> = if (260..380).contains(&px) && (180..320).contains(&py) {
                    Some(1500)
                } else if py >= 240 {
                    Some(8000 - (py as u32 - 240) * 25)
                } else {
                    None
                };
                *sample = match (mm, encoding) {
                    (None, enc) => enc.sentinel(),
                    (Some(mm), DepthEncoding::Raw11Bit) => mm_to_raw(mm as f32 / 1000.0),
                    (Some(mm), _) => mm as u16,
                };
            }
        }
    }
}

/// Inverse of the raw disparity curve, for fabricating raw samples
fn mm_to_raw(metres: f32) -> u16 {
    let raw = (1.0 / metres - 3.330_949_5) / -0.003_071_101_6;
    raw.round().clamp(0.0, 2046.0) as u16
}

fn fill_color(block: &mut Vec<u8>, channels: usize, sequence: u64) {
    block.resize(FRAME_PIXELS * channels, 0);
    let shade = (sequence % 256) as u8;
    for (i, pixel) in block.chunks_exact_mut(channels).enumerate() {
        let px = (i % FRAME_WIDTH) as u8;
        pixel[0] = px;
        if channels == 3 {
            pixel[1] = shade;
            pixel[2] = 255 - px;
        }
    }
}

impl Device for SyntheticDevice {
    fn open(&mut self, _timeout: Duration) -> Result<()> {
        if self.config.unavailable {
            return Err(Error::DeviceUnavailable("synthetic sensor disabled".into()));
        }
        self.is_open = true;
        self.next_due = None;
        log::info!("Synthetic sensor opened at {:.1} Hz", self.config.rate_hz);
        Ok(())
    }

    fn set_depth_format(&mut self, encoding: DepthEncoding) -> Result<()> {
        self.encoding = encoding;
        Ok(())
    }

    fn set_video_format(&mut self, mode: VideoMode) -> Result<()> {
        self.video_mode = mode;
        Ok(())
    }

    fn set_tilt(&mut self, degrees: f32) -> Result<()> {
        self.tilt = clamp_tilt(degrees);
        Ok(())
    }

    fn set_led(&mut self, mode: LedMode) -> Result<()> {
        log::debug!("Synthetic LED {:?}", mode);
        Ok(())
    }

    fn register_depth_callback(&mut self, callback: FrameCallback<u16>) {
        self.depth_callback = Some(callback);
    }

    fn register_color_callback(&mut self, callback: FrameCallback<u8>) {
        self.color_callback = Some(callback);
    }

    fn process_events(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(Error::DeviceUnavailable("synthetic sensor not open".into()));
        }
        if !self.wait_until_due() || self.config.silent || self.limit_reached() {
            return Ok(());
        }

        self.sequence += 1;
        fill_depth(
            &mut self.depth_block,
            self.config.pattern,
            self.encoding,
            self.sequence,
        );
        if let Some(callback) = self.depth_callback.as_mut() {
            callback(&self.depth_block, Instant::now());
        }

        if self.config.color {
            fill_color(&mut self.color_block, self.video_mode.channels(), self.sequence);
            if let Some(callback) = self.color_callback.as_mut() {
                callback(&self.color_block, Instant::now());
            }
        }
        Ok(())
    }

    fn cancel_handle(&self) -> CancelHandle {
        let state = Arc::clone(&self.cancel);
        CancelHandle::new(move || {
            *state.cancelled.lock() = true;
            state.wake.notify_all();
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.is_open {
            self.is_open = false;
            self.close_count.fetch_add(1, Ordering::SeqCst);
            log::info!("Synthetic sensor closed after {} frames", self.sequence);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_open_fails() {
        let mut device = SyntheticDevice::new(SyntheticConfig {
            unavailable: true,
            ..Default::default()
        });
        assert!(matches!(
            device.open(Duration::from_millis(10)),
            Err(Error::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_process_events_dispatches_frames() {
        let mut device = SyntheticDevice::new(SyntheticConfig {
            rate_hz: 200.0,
            pattern: DepthPattern::SequenceMarker,
            ..Default::default()
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        device.register_depth_callback(Box::new(move |block, _| {
            sink.lock().push(block[0]);
        }));
        device.open(Duration::from_millis(10)).unwrap();
        for _ in 0..3 {
            device.process_events().unwrap();
        }
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_cancel_unblocks_pending_poll() {
        let mut device = SyntheticDevice::new(SyntheticConfig {
            rate_hz: 0.1,
            silent: true,
            ..Default::default()
        });
        device.open(Duration::from_millis(10)).unwrap();
        // First poll is due immediately; the second would wait ten seconds
        device.process_events().unwrap();
        let handle = device.cancel_handle();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.cancel();
        });
        let started = Instant::now();
        device.process_events().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[test]
    fn test_close_counts_once() {
        let mut device = SyntheticDevice::new(SyntheticConfig::default());
        let closes = device.close_counter();
        device.open(Duration::from_millis(10)).unwrap();
        device.close().unwrap();
        device.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scene_uses_encoding_sentinel() {
        let mut block = vec![1u16; FRAME_PIXELS];
        fill_depth(&mut block, DepthPattern::Scene, DepthEncoding::Millimeter, 1);
        assert_eq!(block[0], 0);
        fill_depth(&mut block, DepthPattern::Scene, DepthEncoding::Raw11Bit, 1);
        assert_eq!(block[0], 2047);
        // Box centre is 1.5 m away
        let centre = 250 * FRAME_WIDTH + 320;
        assert!(block[centre] < 2047);
    }

    #[test]
    fn test_tilt_is_clamped() {
        let mut device = SyntheticDevice::new(SyntheticConfig::default());
        device.set_tilt(90.0).unwrap();
        assert_eq!(device.tilt(), 30.0);
    }
}
