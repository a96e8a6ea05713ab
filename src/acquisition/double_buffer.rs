//! Front/back frame buffering between a capture context and its readers.
//!
//! The producer fills a back slot it owns exclusively, then exchanges it with
//! the shared front slot in one pointer swap. Readers only ever clone the
//! front `Arc`, so a frame is complete before anyone can see it and is never
//! written again afterwards: a retired front slot is recycled only once no
//! reader still holds it.

use super::frame::Frame;
use crate::device::DepthEncoding;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared half of the double buffer, read by consumers
#[derive(Debug)]
pub struct DoubleBuffer<T> {
    front: Mutex<Option<Arc<Frame<T>>>>,
    updated: AtomicBool,
    published: AtomicU64,
}

impl<T> Default for DoubleBuffer<T> {
    fn default() -> Self {
        Self {
            front: Mutex::new(None),
            updated: AtomicBool::new(false),
            published: AtomicU64::new(0),
        }
    }
}

impl<T> DoubleBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest fully written frame; never blocks on the producer's write
    pub fn latest(&self) -> Option<Arc<Frame<T>>> {
        self.front.lock().clone()
    }

    /// True if a frame was published since the last [`take_updated`](Self::take_updated)
    pub fn is_updated(&self) -> bool {
        self.updated.load(Ordering::Acquire)
    }

    /// Consume the "updated" signal
    pub fn take_updated(&self) -> bool {
        self.updated.swap(false, Ordering::AcqRel)
    }

    /// Sequence number of the newest published frame (0 before the first)
    pub fn published_sequence(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    fn publish(&self, frame: Arc<Frame<T>>) -> Option<Arc<Frame<T>>> {
        let sequence = frame.sequence;
        let retired = self.front.lock().replace(frame);
        self.published.store(sequence, Ordering::Release);
        self.updated.store(true, Ordering::Release);
        retired
    }
}

/// Producer half: owns the back slot
#[derive(Debug)]
pub struct FrameWriter<T> {
    shared: Arc<DoubleBuffer<T>>,
    back: Option<Arc<Frame<T>>>,
    width: usize,
    height: usize,
    next_sequence: u64,
    rejected: u64,
    encoding: Option<DepthEncoding>,
}

impl<T: Copy + Default> FrameWriter<T> {
    pub fn new(shared: Arc<DoubleBuffer<T>>, width: usize, height: usize) -> Self {
        Self {
            shared,
            back: None,
            width,
            height,
            next_sequence: 1,
            rejected: 0,
            encoding: None,
        }
    }

    /// Tag every frame written from now on with `encoding`
    pub fn set_encoding(&mut self, encoding: Option<DepthEncoding>) {
        self.encoding = encoding;
    }

    /// Blocks whose size is not a whole number of channels per pixel
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Copy a complete sample block into the back slot and publish it.
    /// Returns false if the block has the wrong shape.
    pub fn write(&mut self, block: &[T], captured_at: Instant) -> bool {
        let pixels = self.width * self.height;
        if pixels == 0 || block.is_empty() || block.len() % pixels != 0 {
            self.rejected += 1;
            log::warn!(
                "Rejecting {} sample block for a {}x{} frame",
                block.len(),
                self.width,
                self.height
            );
            return false;
        }
        let channels = block.len() / pixels;
        self.write_with(captured_at, |frame| {
            frame.channels = channels;
            frame.data.clear();
            frame.data.extend_from_slice(block);
        });
        true
    }

    /// Fill the back slot through `fill`, then publish it. Returns the
    /// sequence number assigned to the frame.
    pub fn write_with<F>(&mut self, captured_at: Instant, fill: F) -> u64
    where
        F: FnOnce(&mut Frame<T>),
    {
        let mut back = self
            .back
            .take()
            .unwrap_or_else(|| Arc::new(Frame::new(self.width, self.height, 1, T::default())));
        if Arc::get_mut(&mut back).is_none() {
            // Still held by a reader; leave it alone
            back = Arc::new(Frame::new(self.width, self.height, 1, T::default()));
        }

        let sequence = self.next_sequence;
        if let Some(frame) = Arc::get_mut(&mut back) {
            frame.width = self.width;
            frame.height = self.height;
            frame.sequence = sequence;
            frame.captured_at = captured_at;
            frame.encoding = self.encoding;
            fill(frame);
        }
        self.next_sequence += 1;

        self.back = self.shared.publish(back);
        log::trace!("Published frame {}", sequence);
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_until_first_write() {
        let shared = Arc::new(DoubleBuffer::<u16>::new());
        assert!(shared.latest().is_none());
        assert!(!shared.is_updated());
        assert_eq!(shared.published_sequence(), 0);
    }

    #[test]
    fn test_write_publishes_and_flags() {
        let shared = Arc::new(DoubleBuffer::<u16>::new());
        let mut writer = FrameWriter::new(Arc::clone(&shared), 4, 2);
        assert!(writer.write(&[7; 8], Instant::now()));

        let frame = shared.latest().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.data, vec![7; 8]);
        assert!(shared.take_updated());
        assert!(!shared.take_updated());
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let shared = Arc::new(DoubleBuffer::<u8>::new());
        let mut writer = FrameWriter::new(Arc::clone(&shared), 4, 2);
        assert!(!writer.write(&[1; 7], Instant::now()));
        assert_eq!(writer.rejected(), 1);
        assert!(shared.latest().is_none());
    }

    #[test]
    fn test_held_snapshot_is_never_rewritten() {
        let shared = Arc::new(DoubleBuffer::<u16>::new());
        let mut writer = FrameWriter::new(Arc::clone(&shared), 2, 2);
        writer.write(&[1; 4], Instant::now());
        let held = shared.latest().unwrap();

        for value in 2..6 {
            writer.write(&[value; 4], Instant::now());
        }
        assert_eq!(held.sequence, 1);
        assert_eq!(held.data, vec![1; 4]);
        assert_eq!(shared.latest().unwrap().data, vec![5; 4]);
    }

    #[test]
    fn test_unheld_slot_is_recycled() {
        let shared = Arc::new(DoubleBuffer::<u16>::new());
        let mut writer = FrameWriter::new(Arc::clone(&shared), 2, 2);
        writer.write(&[1; 4], Instant::now());
        writer.write(&[2; 4], Instant::now());
        let first_back = writer.back.as_ref().map(Arc::as_ptr);
        writer.write(&[3; 4], Instant::now());
        writer.write(&[4; 4], Instant::now());
        // Two slots alternate when no reader keeps one alive
        assert_eq!(writer.back.as_ref().map(Arc::as_ptr), first_back);
    }

    #[test]
    fn test_frames_carry_the_format_active_at_write() {
        let shared = Arc::new(DoubleBuffer::<u16>::new());
        let mut writer = FrameWriter::new(Arc::clone(&shared), 2, 2);
        writer.write(&[1; 4], Instant::now());
        assert_eq!(shared.latest().unwrap().encoding, None);

        writer.set_encoding(Some(DepthEncoding::Millimeter));
        writer.write(&[2; 4], Instant::now());
        let held = shared.latest().unwrap();

        writer.set_encoding(Some(DepthEncoding::Raw11Bit));
        writer.write(&[3; 4], Instant::now());
        writer.write(&[4; 4], Instant::now());
        assert_eq!(held.encoding, Some(DepthEncoding::Millimeter));
        assert_eq!(shared.latest().unwrap().encoding, Some(DepthEncoding::Raw11Bit));
    }
}
