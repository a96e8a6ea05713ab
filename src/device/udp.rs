//! Network sensor receiving chunked frames over UDP.
//!
//! Each datagram carries one chunk of a depth or colour frame:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 1 | protocol version (1) |
//! | 1 | 1 | stream (0 = depth, 1 = colour) |
//! | 2 | 4 | frame id |
//! | 6 | 2 | chunk index |
//! | 8 | 2 | chunk count |
//! | 10 | 2 | payload length |
//! | 12 | n | payload |
//!
//! All fields are little endian. Chunks are `CHUNK_PAYLOAD` bytes except the
//! last one of a frame. Depth samples are little endian u16.

use super::{
    CancelHandle, DepthEncoding, Device, FrameCallback, LedMode, VideoMode, FRAME_PIXELS,
};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use socket2::SockRef;
use std::io::{Cursor, ErrorKind};
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::Notify;

pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 12;
pub const CHUNK_PAYLOAD: usize = 8192;

const MAX_DATAGRAM: usize = 65536;

/// Socket receive buffer requested on open; room for several whole frames
/// so a burst is not dropped while a callback runs
pub const RECV_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Datagrams read per poll once the first one is in
const MAX_DRAIN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Depth,
    Color,
}

#[derive(Debug)]
struct Chunk<'a> {
    stream: Stream,
    frame_id: u32,
    index: u16,
    count: u16,
    payload: &'a [u8],
}

fn parse_chunk(data: &[u8]) -> std::io::Result<Chunk<'_>> {
    if data.len() < HEADER_SIZE {
        return Err(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("Packet too small ({} < {})", data.len(), HEADER_SIZE),
        ));
    }

    let mut cursor = Cursor::new(data);
    let version = cursor.read_u8()?;
    let stream = cursor.read_u8()?;
    let frame_id = cursor.read_u32::<LittleEndian>()?;
    let index = cursor.read_u16::<LittleEndian>()?;
    let count = cursor.read_u16::<LittleEndian>()?;
    let length = cursor.read_u16::<LittleEndian>()? as usize;

    if version != PROTOCOL_VERSION {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("Unsupported protocol version: {}", version),
        ));
    }
    let stream = match stream {
        0 => Stream::Depth,
        1 => Stream::Color,
        other => {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("Unknown stream: {}", other),
            ))
        }
    };
    if index >= count {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("Chunk index {} out of {}", index, count),
        ));
    }
    if HEADER_SIZE + length > data.len() || length > CHUNK_PAYLOAD {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("Payload length {} exceeds datagram ({})", length, data.len()),
        ));
    }

    Ok(Chunk {
        stream,
        frame_id,
        index,
        count,
        payload: &data[HEADER_SIZE..HEADER_SIZE + length],
    })
}

/// Split a frame's bytes into datagrams (sender side)
pub fn encode_frame(stream: Stream, frame_id: u32, bytes: &[u8]) -> Vec<Vec<u8>> {
    let count = bytes.len().div_ceil(CHUNK_PAYLOAD).max(1);
    let mut datagrams = Vec::with_capacity(count);
    for index in 0..count {
        let start = (index * CHUNK_PAYLOAD).min(bytes.len());
        let end = (start + CHUNK_PAYLOAD).min(bytes.len());
        let payload = &bytes[start..end];

        let mut datagram = Vec::with_capacity(HEADER_SIZE + payload.len());
        // Writes into a Vec cannot fail
        let _ = datagram.write_u8(PROTOCOL_VERSION);
        let _ = datagram.write_u8(match stream {
            Stream::Depth => 0,
            Stream::Color => 1,
        });
        let _ = datagram.write_u32::<LittleEndian>(frame_id);
        let _ = datagram.write_u16::<LittleEndian>(index as u16);
        let _ = datagram.write_u16::<LittleEndian>(count as u16);
        let _ = datagram.write_u16::<LittleEndian>(payload.len() as u16);
        datagram.extend_from_slice(payload);
        datagrams.push(datagram);
    }
    datagrams
}

/// Encode depth samples as little endian bytes
pub fn depth_to_bytes(samples: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let _ = bytes.write_u16::<LittleEndian>(sample);
    }
    bytes
}

/// Reassembles one stream's frame from its chunks
#[derive(Debug)]
struct FrameAssembler {
    expected_len: usize,
    frame_id: Option<u32>,
    received: Vec<bool>,
    remaining: usize,
    written: usize,
    bytes: Vec<u8>,
    dropped: u64,
}

impl FrameAssembler {
    fn new(expected_len: usize) -> Self {
        Self {
            expected_len,
            frame_id: None,
            received: Vec::new(),
            remaining: 0,
            written: 0,
            bytes: vec![0; expected_len],
            dropped: 0,
        }
    }

    fn set_expected_len(&mut self, expected_len: usize) {
        self.expected_len = expected_len;
        self.bytes.resize(expected_len, 0);
        self.frame_id = None;
    }

    /// Returns the complete frame bytes once the last chunk arrives
    fn accept(&mut self, chunk: &Chunk<'_>) -> Option<&[u8]> {
        if self.frame_id != Some(chunk.frame_id) {
            if self.frame_id.is_some() && self.remaining > 0 {
                self.dropped += 1;
                log::warn!(
                    "Dropping incomplete frame {:?} ({} chunks missing)",
                    self.frame_id,
                    self.remaining
                );
            }
            self.frame_id = Some(chunk.frame_id);
            self.received.clear();
            self.received.resize(chunk.count as usize, false);
            self.remaining = chunk.count as usize;
            self.written = 0;
        }

        let index = chunk.index as usize;
        if index >= self.received.len() || self.received[index] {
            return None;
        }
        let offset = index * CHUNK_PAYLOAD;
        if offset + chunk.payload.len() > self.expected_len {
            log::warn!(
                "Chunk {} of frame {} overruns the {} byte frame",
                index,
                chunk.frame_id,
                self.expected_len
            );
            return None;
        }
        self.bytes[offset..offset + chunk.payload.len()].copy_from_slice(chunk.payload);
        self.received[index] = true;
        self.remaining -= 1;
        self.written += chunk.payload.len();

        if self.remaining > 0 {
            return None;
        }
        if self.written != self.expected_len {
            self.dropped += 1;
            log::warn!(
                "Frame {} carried {} of {} bytes",
                chunk.frame_id,
                self.written,
                self.expected_len
            );
            return None;
        }
        Some(&self.bytes)
    }
}

/// Depth sensor streaming over UDP
pub struct UdpDevice {
    bind_address: SocketAddr,
    runtime: Option<Runtime>,
    socket: Option<tokio::net::UdpSocket>,
    cancel: Arc<Notify>,
    buf: Vec<u8>,
    depth: FrameAssembler,
    color: FrameAssembler,
    depth_samples: Vec<u16>,
    depth_callback: Option<FrameCallback<u16>>,
    color_callback: Option<FrameCallback<u8>>,
    parse_errors: u64,
}

impl UdpDevice {
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            runtime: None,
            socket: None,
            cancel: Arc::new(Notify::new()),
            buf: vec![0; MAX_DATAGRAM],
            depth: FrameAssembler::new(FRAME_PIXELS * 2),
            color: FrameAssembler::new(FRAME_PIXELS * VideoMode::default().channels()),
            depth_samples: vec![0; FRAME_PIXELS],
            depth_callback: None,
            color_callback: None,
            parse_errors: 0,
        }
    }

    /// (dropped depth frames, dropped colour frames, malformed datagrams)
    pub fn stats(&self) -> (u64, u64, u64) {
        (self.depth.dropped, self.color.dropped, self.parse_errors)
    }

    /// Read whatever else is already queued without waiting
    fn drain_ready(&mut self) -> Result<()> {
        for _ in 0..MAX_DRAIN {
            let Some(socket) = self.socket.as_ref() else {
                return Ok(());
            };
            match socket.try_recv_from(&mut self.buf) {
                Ok((len, _addr)) => self.accept_datagram(len),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn accept_datagram(&mut self, len: usize) {
        let chunk = match parse_chunk(&self.buf[..len]) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.parse_errors += 1;
                log::warn!("Error parsing depth datagram: {}", e);
                return;
            }
        };

        let at = Instant::now();
        match chunk.stream {
            Stream::Depth => {
                if let Some(bytes) = self.depth.accept(&chunk) {
                    for (sample, pair) in self.depth_samples.iter_mut().zip(bytes.chunks_exact(2)) {
                        *sample = u16::from_le_bytes([pair[0], pair[1]]);
                    }
                    if let Some(callback) = self.depth_callback.as_mut() {
                        callback(&self.depth_samples, at);
                    }
                }
            }
            Stream::Color => {
                if let Some(bytes) = self.color.accept(&chunk) {
                    if let Some(callback) = self.color_callback.as_mut() {
                        callback(bytes, at);
                    }
                }
            }
        }
    }
}

impl Device for UdpDevice {
    fn open(&mut self, timeout: Duration) -> Result<()> {
        let socket = StdUdpSocket::bind(self.bind_address)?;
        raise_recv_buffer(&socket);
        socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        // A sensor counts as online once it sends anything
        let len = match socket.recv_from(&mut self.buf) {
            Ok((len, addr)) => {
                log::info!("Depth stream online from {}", addr);
                len
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(Error::DeviceUnavailable(format!(
                    "no datagram on {} within {:?}",
                    self.bind_address, timeout
                )));
            }
            Err(e) => return Err(e.into()),
        };

        socket.set_read_timeout(None)?;
        socket.set_nonblocking(true)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        let socket = {
            let _guard = runtime.enter();
            tokio::net::UdpSocket::from_std(socket)?
        };
        self.runtime = Some(runtime);
        self.socket = Some(socket);

        self.accept_datagram(len);
        Ok(())
    }

    fn set_depth_format(&mut self, encoding: DepthEncoding) -> Result<()> {
        // The sender chooses the encoding; samples are passed through as is
        log::debug!("Reading UDP depth as {:?}", encoding);
        Ok(())
    }

    fn set_video_format(&mut self, mode: VideoMode) -> Result<()> {
        self.color.set_expected_len(FRAME_PIXELS * mode.channels());
        Ok(())
    }

    fn set_tilt(&mut self, _degrees: f32) -> Result<()> {
        Err(Error::NotSupported("tilt over UDP stream".into()))
    }

    fn set_led(&mut self, _mode: LedMode) -> Result<()> {
        Err(Error::NotSupported("LED over UDP stream".into()))
    }

    fn register_depth_callback(&mut self, callback: FrameCallback<u16>) {
        self.depth_callback = Some(callback);
    }

    fn register_color_callback(&mut self, callback: FrameCallback<u8>) {
        self.color_callback = Some(callback);
    }

    fn process_events(&mut self) -> Result<()> {
        let (Some(runtime), Some(socket)) = (self.runtime.as_ref(), self.socket.as_ref()) else {
            return Err(Error::DeviceUnavailable("UDP stream not open".into()));
        };
        let cancel = Arc::clone(&self.cancel);
        let buf = &mut self.buf;

        let received = runtime.block_on(async {
            tokio::select! {
                result = socket.recv_from(buf) => Some(result),
                _ = cancel.notified() => None,
            }
        });

        match received {
            Some(Ok((len, _addr))) => {
                self.accept_datagram(len);
                self.drain_ready()
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn cancel_handle(&self) -> CancelHandle {
        let cancel = Arc::clone(&self.cancel);
        CancelHandle::new(move || cancel.notify_one())
    }

    fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            let (depth, color, errors) = self.stats();
            log::info!(
                "UDP stream closed ({} depth / {} colour frames dropped, {} bad datagrams)",
                depth,
                color,
                errors
            );
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        Ok(())
    }
}

/// Ask for `RECV_BUFFER_SIZE` bytes of kernel buffering; the kernel may clamp it
fn raise_recv_buffer(socket: &StdUdpSocket) {
    let sock_ref = SockRef::from(socket);
    if let Err(e) = sock_ref.set_recv_buffer_size(RECV_BUFFER_SIZE) {
        log::warn!("Could not raise UDP receive buffer: {}", e);
    }
    match sock_ref.recv_buffer_size() {
        Ok(size) if size < RECV_BUFFER_SIZE => log::warn!(
            "UDP receive buffer is {} bytes ({} requested), bursts may drop frames; \
             raise net.core.rmem_max",
            size,
            RECV_BUFFER_SIZE
        ),
        Ok(size) => log::debug!("UDP receive buffer {} bytes", size),
        Err(e) => log::warn!("Could not read UDP receive buffer size: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn free_port() -> SocketAddr {
        let probe = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    }

    #[test]
    fn test_parse_rejects_short_packet() {
        assert!(parse_chunk(&[1, 0, 0]).is_err());
    }

    #[test]
    fn test_assembler_out_of_order() {
        let bytes: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let datagrams = encode_frame(Stream::Color, 7, &bytes);
        assert_eq!(datagrams.len(), 3);

        let mut assembler = FrameAssembler::new(bytes.len());
        for i in [2usize, 0] {
            let chunk = parse_chunk(&datagrams[i]).unwrap();
            assert!(assembler.accept(&chunk).is_none());
        }
        let chunk = parse_chunk(&datagrams[1]).unwrap();
        assert_eq!(assembler.accept(&chunk), Some(bytes.as_slice()));
    }

    #[test]
    fn test_assembler_drops_incomplete_frame() {
        let bytes = vec![3u8; 20_000];
        let first = encode_frame(Stream::Color, 1, &bytes);
        let second = encode_frame(Stream::Color, 2, &bytes);

        let mut assembler = FrameAssembler::new(bytes.len());
        assembler.accept(&parse_chunk(&first[0]).unwrap());
        for datagram in &second {
            assembler.accept(&parse_chunk(datagram).unwrap());
        }
        assert_eq!(assembler.dropped, 1);
    }

    #[test]
    fn test_open_without_sender_is_unavailable() {
        let mut device = UdpDevice::new(free_port());
        let result = device.open(Duration::from_millis(50));
        assert!(matches!(result, Err(Error::DeviceUnavailable(_))));
    }

    #[test]
    fn test_receives_depth_frame_and_cancels() {
        let addr = free_port();
        let running = Arc::new(AtomicBool::new(true));
        let sender_running = Arc::clone(&running);
        let sender = std::thread::spawn(move || {
            let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
            let bytes = depth_to_bytes(&vec![1234u16; FRAME_PIXELS]);
            let mut frame_id = 0;
            while sender_running.load(Ordering::SeqCst) {
                frame_id += 1;
                // Paced like a sensor link, so a small kernel buffer still keeps up
                for datagram in encode_frame(Stream::Depth, frame_id, &bytes) {
                    let _ = socket.send_to(&datagram, addr);
                    std::thread::sleep(Duration::from_micros(200));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        let mut device = UdpDevice::new(addr);
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        device.register_depth_callback(Box::new(move |block, _| {
            *sink.lock() = Some((block.len(), block[0]));
        }));
        device.open(Duration::from_secs(2)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().is_none() && Instant::now() < deadline {
            device.process_events().unwrap();
        }
        assert_eq!(*seen.lock(), Some((FRAME_PIXELS, 1234)));

        running.store(false, Ordering::SeqCst);
        sender.join().unwrap();

        // With the sender gone, only cancellation can end the poll
        device.cancel_handle().cancel();
        device.process_events().unwrap();
        device.close().unwrap();
    }

    #[test]
    fn test_one_poll_reads_every_queued_datagram() {
        let addr = free_port();
        let sender = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let mut device = UdpDevice::new(addr);
        let opener = std::thread::spawn(move || {
            device.open(Duration::from_secs(2)).map(|_| device)
        });
        // Keep knocking until the socket is bound and the first one lands
        let deadline = Instant::now() + Duration::from_secs(2);
        while !opener.is_finished() && Instant::now() < deadline {
            let _ = sender.send_to(&[0xff; 4], addr);
            std::thread::sleep(Duration::from_millis(5));
        }
        let mut device = opener.join().unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let (_, _, before) = device.stats();

        for _ in 0..20 {
            sender.send_to(&[0xff; 4], addr).unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        device.process_events().unwrap();

        // Everything queued was consumed by that single poll
        let (_, _, after) = device.stats();
        assert!(after - before >= 20, "{} -> {}", before, after);
        device.cancel_handle().cancel();
        device.process_events().unwrap();
        let (_, _, last) = device.stats();
        assert_eq!(last, after);
        device.close().unwrap();
    }
}
