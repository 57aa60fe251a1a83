//! Shared fixtures for the integration tests

#![allow(dead_code)]

use framebridge::encoder::{EncoderBackend, EncoderError, EncoderStats, SupervisorState, TransportState};
use framebridge::protocol::{fragment_frame, Chunk, RawFrameInfo};
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// JPEG-looking frame whose body depends on `id`
pub fn jpeg_frame(id: u32, len: usize) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(id) as u8)
        .collect();
    data[0] = 0xFF;
    data[1] = 0xD8;
    data
}

pub fn chunks(id: u32, frame: &[u8], max_payload: usize, raw: Option<RawFrameInfo>) -> Vec<Chunk> {
    fragment_frame(id, frame, max_payload, raw).unwrap()
}

pub fn send_chunks(socket: &UdpSocket, target: SocketAddr, chunks: &[Chunk]) {
    for chunk in chunks {
        socket.send_to(&chunk.to_bytes(), target).unwrap();
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// In-memory encoder backend
pub struct MemoryBackend {
    running: AtomicBool,
    /// Successful sends allowed before the backend "dies"
    capacity: Option<u64>,
    sent: AtomicU64,
    failed: AtomicU64,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            running: AtomicBool::new(false),
            capacity: None,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn dying_after(frames: u64) -> Self {
        MemoryBackend {
            capacity: Some(frames),
            ..MemoryBackend::new()
        }
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl EncoderBackend for MemoryBackend {
    fn start(&self) -> Result<(), EncoderError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EncoderError::AlreadyRunning);
        }
        Ok(())
    }

    fn send(&self, frame: &[u8]) -> bool {
        let exhausted = self
            .capacity
            .map_or(false, |limit| self.sent.load(Ordering::SeqCst) >= limit);
        if exhausted {
            self.running.store(false, Ordering::SeqCst);
        }
        if !self.running.load(Ordering::SeqCst) {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return false;
        }

        self.frames.lock().push(frame.to_vec());
        self.sent.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn statistics(&self) -> EncoderStats {
        let state = if self.running.load(Ordering::SeqCst) {
            SupervisorState::Running {
                transport: TransportState::Up,
            }
        } else {
            SupervisorState::Stopped
        };
        EncoderStats {
            state,
            frames_sent: self.sent.load(Ordering::SeqCst),
            frames_failed: self.failed.load(Ordering::SeqCst),
            ..EncoderStats::stopped()
        }
    }
}
