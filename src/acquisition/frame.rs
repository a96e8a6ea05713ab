use crate::device::DepthEncoding;
use std::time::Instant;

/// One complete sample block from a sensor stream
#[derive(Debug, Clone)]
pub struct Frame<T> {
    pub width: usize,
    pub height: usize,
    /// Samples per pixel
    pub channels: usize,
    /// Monotonic per-stream sequence number, starting at 1
    pub sequence: u64,
    pub captured_at: Instant,
    /// Depth format the samples were captured in; `None` for colour frames
    /// and frames built outside a capture context
    pub encoding: Option<DepthEncoding>,
    pub data: Vec<T>,
}

/// 16-bit depth frame
pub type DepthFrame = Frame<u16>;

/// 8-bit colour (or infrared) frame
pub type ColorFrame = Frame<u8>;

impl<T: Copy> Frame<T> {
    pub fn new(width: usize, height: usize, channels: usize, fill: T) -> Self {
        Self {
            width,
            height,
            channels,
            sequence: 0,
            captured_at: Instant::now(),
            encoding: None,
            data: vec![fill; width * height * channels],
        }
    }

    /// Build a frame around existing samples
    pub fn from_samples(width: usize, height: usize, sequence: u64, data: Vec<T>) -> Self {
        let pixels = (width * height).max(1);
        Self {
            width,
            height,
            channels: data.len() / pixels,
            sequence,
            captured_at: Instant::now(),
            encoding: None,
            data,
        }
    }

    /// Samples of the pixel at column `px`, row `py`
    pub fn pixel(&self, px: usize, py: usize) -> Option<&[T]> {
        if px >= self.width || py >= self.height {
            return None;
        }
        let start = (py * self.width + px) * self.channels;
        self.data.get(start..start + self.channels)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn with_encoding(mut self, encoding: DepthEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }
}
