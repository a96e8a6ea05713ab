use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Frame rate over a rolling window of arrival times
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: Duration,
    arrivals: VecDeque<Instant>,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            arrivals: VecDeque::new(),
        }
    }

    /// Record a frame arrival
    pub fn record(&mut self, at: Instant) {
        if let Some(&last) = self.arrivals.back() {
            if at < last {
                // Out of order arrival; the window only moves forward
                return;
            }
        }
        self.arrivals.push_back(at);
        self.evict(at);
    }

    /// Frames per second as of `now`. Zero once nothing has arrived for a
    /// whole window.
    pub fn fps_at(&mut self, now: Instant) -> f32 {
        match self.arrivals.back() {
            Some(&last) if now.saturating_duration_since(last) <= self.window => {}
            _ => {
                self.arrivals.clear();
                return 0.0;
            }
        }
        self.evict(now);

        let (Some(&first), Some(&last)) = (self.arrivals.front(), self.arrivals.back()) else {
            return 0.0;
        };
        let span = last.duration_since(first).as_secs_f32();
        if self.arrivals.len() < 2 || span <= 0.0 {
            return 0.0;
        }
        (self.arrivals.len() - 1) as f32 / span
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&first) = self.arrivals.front() {
            if now.saturating_duration_since(first) > self.window {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
