use skygrid::acquisition::{DoubleBuffer, FpsCounter, FrameWriter};
use skygrid::config::AcquisitionConfig;
use skygrid::device::{DepthPattern, SyntheticConfig, SyntheticDevice};
use skygrid::FrameAcquisition;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn consumers_never_see_a_torn_frame() {
    let shared = Arc::new(DoubleBuffer::<u32>::new());
    let mut writer = FrameWriter::new(Arc::clone(&shared), 64, 48);
    let done = Arc::new(AtomicBool::new(false));

    let producer = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for _ in 0..5000 {
                // Each sample is written one by one with the frame's own marker
                writer.write_with(Instant::now(), |frame| {
                    let marker = frame.sequence as u32;
                    frame.data.resize(64 * 48, 0);
                    for sample in frame.data.iter_mut() {
                        *sample = marker;
                    }
                });
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let shared = Arc::clone(&shared);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = 0;
                let mut checked = 0u64;
                while !done.load(Ordering::SeqCst) {
                    let Some(frame) = shared.latest() else {
                        continue;
                    };
                    let marker = frame.sequence as u32;
                    assert!(frame.data.iter().all(|&s| s == marker), "torn frame {}", marker);
                    assert!(frame.sequence >= last, "sequence went backwards");
                    last = frame.sequence;
                    checked += 1;
                }
                checked
            })
        })
        .collect();

    producer.join().unwrap();
    let checked: u64 = consumers.into_iter().map(|c| c.join().unwrap()).sum();
    assert!(checked > 0);
    assert_eq!(shared.published_sequence(), 5000);
}

#[test]
fn fps_matches_injected_rate() {
    let start = Instant::now();
    let mut counter = FpsCounter::new(Duration::from_secs(1));
    let period = Duration::from_micros(33_333);
    let mut at = start;
    for _ in 0..90 {
        counter.record(at);
        at += period;
    }
    let fps = counter.fps_at(at - period);
    assert!((fps - 30.0).abs() < 0.5, "fps {}", fps);

    // No stale averaging once the stream stops
    assert_eq!(counter.fps_at(at + Duration::from_secs(2)), 0.0);
    counter.record(at + Duration::from_secs(3));
    assert_eq!(counter.fps_at(at + Duration::from_secs(3)), 0.0);
}

#[test]
fn synthetic_stream_rate_is_measured() {
    let device = SyntheticDevice::new(SyntheticConfig {
        rate_hz: 50.0,
        pattern: DepthPattern::Constant(800),
        ..Default::default()
    });
    let config = AcquisitionConfig {
        connect_timeout_ms: 100,
        ..Default::default()
    };
    let mut acquisition = FrameAcquisition::start(Box::new(device), &config).unwrap();
    thread::sleep(Duration::from_millis(1500));

    let fps = acquisition.depth_fps();
    assert!(fps > 35.0 && fps < 65.0, "depth fps {}", fps);
    assert!(acquisition.color_fps() > 35.0);
    acquisition.stop().unwrap();
    assert!(!acquisition.is_running());
}

#[test]
fn stop_unblocks_a_slow_device_promptly() {
    let device = SyntheticDevice::new(SyntheticConfig {
        rate_hz: 0.2,
        ..Default::default()
    });
    let mut acquisition =
        FrameAcquisition::start(Box::new(device), &AcquisitionConfig::default()).unwrap();
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    acquisition.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
}
