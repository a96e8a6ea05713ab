//! Frame acquisition: owns the device session and its capture context.

use super::double_buffer::{DoubleBuffer, FrameWriter};
use super::fps::FpsCounter;
use super::frame::{ColorFrame, DepthFrame};
use crate::config::AcquisitionConfig;
use crate::device::{
    CancelHandle, DepthEncoding, Device, DeviceCommand, FRAME_HEIGHT, FRAME_WIDTH,
};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Runs a sensor on a dedicated capture thread and double-buffers its frames
pub struct FrameAcquisition {
    watchdog: Duration,
    depth: Arc<DoubleBuffer<u16>>,
    color: Arc<DoubleBuffer<u8>>,
    depth_fps: Arc<Mutex<FpsCounter>>,
    color_fps: Arc<Mutex<FpsCounter>>,
    started_at: Instant,
    shutdown: Arc<AtomicBool>,
    error_count: Arc<AtomicU64>,
    commands: Sender<DeviceCommand>,
    cancel: CancelHandle,
    capture: Option<JoinHandle<Option<CaptureExit>>>,
}

/// What the capture thread hands back for teardown
struct CaptureExit {
    device: Box<dyn Device>,
    panicked: bool,
}

/// State shared between the capture thread and the acquisition handle
struct CaptureContext {
    shutdown: Arc<AtomicBool>,
    commands: Receiver<DeviceCommand>,
    error_count: Arc<AtomicU64>,
    depth: Arc<DoubleBuffer<u16>>,
    encoding: Arc<Mutex<DepthEncoding>>,
}

impl FrameAcquisition {
    /// Open `device`, register the frame callbacks and start capturing.
    ///
    /// Fails with `DeviceUnavailable` if the sensor does not answer within
    /// the configured connect timeout.
    pub fn start(mut device: Box<dyn Device>, config: &AcquisitionConfig) -> Result<Self> {
        device.open(config.connect_timeout())?;

        let formats = device
            .set_depth_format(config.depth_encoding)
            .and_then(|_| device.set_video_format(config.video_mode));
        if let Err(e) = formats {
            device.close()?;
            return Err(e);
        }
        for command in [
            DeviceCommand::SetLed(config.led),
            DeviceCommand::SetTilt(config.tilt_degrees),
        ] {
            if let Err(e) = device.apply(command) {
                log::warn!("Initial {:?} failed: {}", command, e);
            }
        }

        let depth = Arc::new(DoubleBuffer::new());
        let color = Arc::new(DoubleBuffer::new());
        let depth_fps = Arc::new(Mutex::new(FpsCounter::new(config.fps_window())));
        let color_fps = Arc::new(Mutex::new(FpsCounter::new(config.fps_window())));

        // Format in effect for the samples the driver is delivering
        let encoding = Arc::new(Mutex::new(config.depth_encoding));

        let mut depth_writer = FrameWriter::new(Arc::clone(&depth), FRAME_WIDTH, FRAME_HEIGHT);
        let fps = Arc::clone(&depth_fps);
        let active = Arc::clone(&encoding);
        device.register_depth_callback(Box::new(move |block, at| {
            depth_writer.set_encoding(Some(*active.lock()));
            if depth_writer.write(block, at) {
                fps.lock().record(at);
            }
        }));

        let mut color_writer = FrameWriter::new(Arc::clone(&color), FRAME_WIDTH, FRAME_HEIGHT);
        let fps = Arc::clone(&color_fps);
        device.register_color_callback(Box::new(move |block, at| {
            if color_writer.write(block, at) {
                fps.lock().record(at);
            }
        }));

        let shutdown = Arc::new(AtomicBool::new(false));
        let error_count = Arc::new(AtomicU64::new(0));
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let cancel = device.cancel_handle();

        let context = CaptureContext {
            shutdown: Arc::clone(&shutdown),
            commands: command_rx,
            error_count: Arc::clone(&error_count),
            depth: Arc::clone(&depth),
            encoding,
        };

        // The device follows the thread only once it exists, so a failed
        // spawn still leaves it here to close
        let (handoff, device_rx) = crossbeam_channel::bounded::<Box<dyn Device>>(1);
        let spawned = thread::Builder::new()
            .name("depth-capture".to_string())
            .spawn(move || {
                let device = device_rx.recv().ok()?;
                Some(capture_loop(device, context))
            });
        let capture = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(close_err) = device.close() {
                    log::warn!("Closing device after failed spawn: {}", close_err);
                }
                return Err(Error::Io(e));
            }
        };
        if let Err(unsent) = handoff.send(device) {
            let mut device = unsent.into_inner();
            device.close()?;
            return Err(Error::ThreadPanic("depth-capture"));
        }

        log::info!(
            "Acquisition started ({:?} depth, {:?} video)",
            config.depth_encoding,
            config.video_mode
        );

        Ok(Self {
            watchdog: config.watchdog(),
            depth,
            color,
            depth_fps,
            color_fps,
            started_at: Instant::now(),
            shutdown,
            error_count,
            commands,
            cancel,
            capture: Some(capture),
        })
    }

    /// Stop capturing and release the device. Safe to call repeatedly.
    pub fn stop(&mut self) -> Result<()> {
        let Some(capture) = self.capture.take() else {
            return Ok(());
        };
        log::info!("Stopping acquisition...");
        self.shutdown.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        // Callbacks only run on the capture thread, so joining drains them
        let exit = capture
            .join()
            .map_err(|_| Error::ThreadPanic("depth-capture"))?;
        let Some(CaptureExit {
            mut device,
            panicked,
        }) = exit
        else {
            return Ok(());
        };
        device.close()?;

        log::info!(
            "Acquisition stopped after {} depth frames ({} driver errors)",
            self.depth.published_sequence(),
            self.error_count.load(Ordering::Relaxed)
        );
        if panicked {
            return Err(Error::ThreadPanic("depth-capture"));
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.capture.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Newest complete depth frame, or `None` before the first one arrives
    pub fn latest_depth(&self) -> Option<Arc<DepthFrame>> {
        self.depth.latest()
    }

    /// Newest complete colour frame, or `None` before the first one arrives
    pub fn latest_color(&self) -> Option<Arc<ColorFrame>> {
        self.color.latest()
    }

    /// Consume the depth "updated" flag
    pub fn take_depth_update(&self) -> bool {
        self.depth.take_updated()
    }

    /// Consume the colour "updated" flag
    pub fn take_color_update(&self) -> bool {
        self.color.take_updated()
    }

    /// Watchdog: `SignalLost` when no unconsumed depth frame is pending and the
    /// newest one (or the start, if none arrived) is older than the threshold
    pub fn check_signal(&self, now: Instant) -> Result<()> {
        if self.depth.is_updated() {
            return Ok(());
        }
        let last = self
            .depth
            .latest()
            .map_or(self.started_at, |frame| frame.captured_at.max(self.started_at));
        let since = now.saturating_duration_since(last);
        if since > self.watchdog {
            return Err(Error::SignalLost { since });
        }
        Ok(())
    }

    /// Depth frames delivered per second
    pub fn depth_fps(&self) -> f32 {
        self.depth_fps.lock().fps_at(Instant::now())
    }

    /// Colour frames delivered per second
    pub fn color_fps(&self) -> f32 {
        self.color_fps.lock().fps_at(Instant::now())
    }

    /// Queue a device command for the capture thread
    pub fn send_command(&self, command: DeviceCommand) -> Result<()> {
        if self.capture.is_none() {
            return Err(Error::DeviceUnavailable("acquisition stopped".into()));
        }
        self.commands
            .send(command)
            .map_err(|_| Error::DeviceUnavailable("capture thread gone".into()))?;
        // Wake the poll so the command applies promptly
        self.cancel.cancel();
        Ok(())
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}

impl Drop for FrameAcquisition {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Acquisition shutdown failed: {}", e);
        }
    }
}

/// Run the poll loop until shutdown. A panic in the driver or a callback
/// ends the loop but still returns the device so `stop()` can close it.
fn capture_loop(mut device: Box<dyn Device>, context: CaptureContext) -> CaptureExit {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        poll_until_shutdown(device.as_mut(), &context)
    }));
    let panicked = outcome.is_err();
    if panicked {
        context.error_count.fetch_add(1, Ordering::Relaxed);
        log::error!("Capture thread panicked, device left for shutdown");
    }
    CaptureExit { device, panicked }
}

fn poll_until_shutdown(device: &mut dyn Device, context: &CaptureContext) {
    let mut last_logged = 0;

    while !context.shutdown.load(Ordering::SeqCst) {
        while let Ok(command) = context.commands.try_recv() {
            match device.apply(command) {
                Ok(()) => {
                    if let DeviceCommand::SetDepthFormat(encoding) = command {
                        *context.encoding.lock() = encoding;
                    }
                    log::debug!("Applied {:?}", command);
                }
                Err(e) => log::warn!("{:?} failed: {}", command, e),
            }
        }

        if let Err(e) = device.process_events() {
            context.error_count.fetch_add(1, Ordering::Relaxed);
            log::error!("Sensor poll error: {}", e);
            thread::sleep(ERROR_BACKOFF);
        }

        let published = context.depth.published_sequence();
        if published >= last_logged + 100 {
            last_logged = published;
            log::debug!(
                "Capture: {} depth frames, {} errors",
                published,
                context.error_count.load(Ordering::Relaxed)
            );
        }
    }

    log::info!("Capture thread exiting");
}
