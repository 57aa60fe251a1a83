//! Bridge pipeline
//!
//! Listener → Reassembler → FrameQueue → Pacer → EncoderBackend.
//!
//! Three threads are owned here: the UDP receive loop, the staleness sweeper
//! and the dispatch loop. The encoder backend may run more of its own. A single
//! running flag, checked at the top of every loop, winds everything down.

use crate::error::{BridgeError, Result};
use crate::listener::{ListenerConfig, PacketListener};
use crate::pacer::Pacer;
use crate::stats::BridgeStats;
use crate::sweeper::Sweeper;
use framebridge_encoder::EncoderBackend;
use framebridge_io::Timer;
use framebridge_protocol::{ChunkVariant, CompleteFrame, FrameQueue, Reassembler, ReassemblyConfig, ReceiverStats};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default compressed-path listen address
pub const DEFAULT_COMPRESSED_ADDR: &str = "127.0.0.1:5000";

/// Default raw-path listen address
pub const DEFAULT_RAW_ADDR: &str = "127.0.0.1:5001";

/// Complete pipeline settings
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub listener: ListenerConfig,
    pub reassembly: ReassemblyConfig,
    pub queue_capacity: usize,
    pub target_fps: f64,
    /// Upper bound on a single pacing sleep
    pub max_sleep: Duration,
    /// How long the dispatch loop waits for a frame before rechecking the flag
    pub poll_timeout: Duration,
    pub sweep_interval: Duration,
    /// Periodic report interval; `None` disables reporting
    pub stats_interval: Option<Duration>,
}

impl BridgeConfig {
    /// Compressed (JPEG) path defaults
    pub fn compressed(addr: SocketAddr) -> Self {
        BridgeConfig {
            listener: ListenerConfig::new(addr, ChunkVariant::Compressed),
            reassembly: ReassemblyConfig::compressed(),
            queue_capacity: 3,
            target_fps: 20.0,
            max_sleep: Duration::from_millis(50),
            poll_timeout: Duration::from_millis(10),
            sweep_interval: Duration::from_millis(500),
            stats_interval: Some(Duration::from_secs(5)),
        }
    }

    /// Raw frame path defaults
    pub fn raw(addr: SocketAddr) -> Self {
        BridgeConfig {
            listener: ListenerConfig::new(addr, ChunkVariant::Raw),
            reassembly: ReassemblyConfig::raw(),
            queue_capacity: 10,
            ..BridgeConfig::compressed(addr)
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig::compressed(SocketAddr::from(([127, 0, 0, 1], 5000)))
    }
}

struct Workers {
    listener: PacketListener,
    sweeper: Sweeper,
    dispatcher: Option<JoinHandle<()>>,
}

/// Frame bridge from a UDP chunk stream to an encoder backend
pub struct Bridge {
    config: BridgeConfig,
    backend: Arc<dyn EncoderBackend>,
    queue: FrameQueue<CompleteFrame>,
    reassembler: Arc<Mutex<Reassembler>>,
    stats: Arc<ReceiverStats>,
    running: Arc<AtomicBool>,
    workers: Mutex<Option<Workers>>,
    local_addr: Mutex<Option<SocketAddr>>,
    started_at: Mutex<Option<Instant>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, backend: Arc<dyn EncoderBackend>) -> Self {
        let queue = FrameQueue::new(config.queue_capacity);
        let stats = Arc::new(ReceiverStats::new());
        let reassembler = Arc::new(Mutex::new(Reassembler::new(
            config.reassembly,
            queue.clone(),
            Arc::clone(&stats),
        )));

        Bridge {
            config,
            backend,
            queue,
            reassembler,
            stats,
            running: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(None),
            local_addr: Mutex::new(None),
            started_at: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Bind the listener, start the encoder and spawn the worker threads
    ///
    /// Returns the bound listen address. A bind or encoder start failure is
    /// returned here and leaves nothing running.
    pub fn start(&self) -> Result<SocketAddr> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }
        if self.queue.is_closed() {
            return Err(BridgeError::Stopped);
        }

        self.running.store(true, Ordering::Release);

        let mut listener = match PacketListener::start(
            &self.config.listener,
            Arc::clone(&self.reassembler),
            Arc::clone(&self.stats),
            Arc::clone(&self.running),
        ) {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                tracing::error!("Failed to start listener: {}", e);
                return Err(e);
            }
        };

        let abort = |listener: &mut PacketListener| {
            self.running.store(false, Ordering::Release);
            listener.join();
        };

        if let Err(e) = self.backend.start() {
            tracing::error!("Failed to start encoder: {}", e);
            abort(&mut listener);
            return Err(e.into());
        }

        let sweeper = match Sweeper::start(self.config.sweep_interval, Arc::clone(&self.reassembler)) {
            Ok(sweeper) => sweeper,
            Err(e) => {
                abort(&mut listener);
                self.backend.stop();
                return Err(e);
            }
        };

        let started = Instant::now();
        let dispatch = DispatchLoop {
            pacer: Pacer::new(self.queue.clone(), self.config.target_fps, self.config.max_sleep),
            backend: Arc::clone(&self.backend),
            stats: Arc::clone(&self.stats),
            running: Arc::clone(&self.running),
            poll_timeout: self.config.poll_timeout,
            stats_interval: self.config.stats_interval,
            started,
        };
        let dispatcher = match thread::Builder::new()
            .name("frame-dispatch".to_string())
            .spawn(move || dispatch.run())
        {
            Ok(handle) => handle,
            Err(source) => {
                abort(&mut listener);
                drop(sweeper);
                self.backend.stop();
                return Err(BridgeError::Thread {
                    name: "dispatch",
                    source,
                });
            }
        };

        let local_addr = listener.local_addr();
        *self.local_addr.lock() = Some(local_addr);
        *self.started_at.lock() = Some(started);
        *workers = Some(Workers {
            listener,
            sweeper,
            dispatcher: Some(dispatcher),
        });

        tracing::info!(
            "Bridge running: {} -> encoder at {} fps (queue {})",
            local_addr,
            self.config.target_fps,
            self.queue.capacity()
        );
        Ok(local_addr)
    }

    /// Stop every thread and the encoder; idempotent
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.queue.close();

        let workers = self.workers.lock().take();
        let Some(mut workers) = workers else {
            return;
        };

        workers.listener.join();
        workers.sweeper.stop();
        // Stopping the backend first unblocks a dispatch thread stuck writing
        // to an encoder that no longer reads
        self.backend.stop();
        if let Some(dispatcher) = workers.dispatcher.take() {
            if dispatcher.join().is_err() {
                tracing::error!("Dispatch thread panicked");
            }
        }

        let abandoned = self.reassembler.lock().clear();
        let unsent = self.queue.clear();
        if abandoned > 0 || unsent > 0 {
            tracing::debug!(
                "Discarded {} partial and {} queued frames at shutdown",
                abandoned,
                unsent
            );
        }

        let stats = self.statistics();
        tracing::info!(
            "Bridge stopped after {:.1}s: {} frames completed, {} sent",
            stats.uptime.as_secs_f64(),
            stats.receiver.frames_completed,
            stats.encoder.frames_sent
        );
    }

    /// True until `stop()` is called or the encoder fails
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Block until the pipeline stops running or `timeout` passes
    ///
    /// Returns true if the pipeline stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
        true
    }

    /// Block until the pipeline stops running
    pub fn wait(&self) {
        while self.is_running() {
            thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn receiver_stats(&self) -> &Arc<ReceiverStats> {
        &self.stats
    }

    pub fn statistics(&self) -> BridgeStats {
        collect_stats(
            &self.stats,
            self.backend.as_ref(),
            self.queue.len(),
            self.started_at
                .lock()
                .map(|started| started.elapsed())
                .unwrap_or_default(),
        )
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn collect_stats(
    stats: &ReceiverStats,
    backend: &dyn EncoderBackend,
    queue_depth: usize,
    uptime: Duration,
) -> BridgeStats {
    BridgeStats {
        receiver: stats.snapshot(),
        encoder: backend.statistics(),
        queue_depth,
        uptime,
    }
}

struct DispatchLoop {
    pacer: Pacer,
    backend: Arc<dyn EncoderBackend>,
    stats: Arc<ReceiverStats>,
    running: Arc<AtomicBool>,
    poll_timeout: Duration,
    stats_interval: Option<Duration>,
    started: Instant,
}

impl DispatchLoop {
    fn run(mut self) {
        let mut report = self.stats_interval.map(Timer::new);

        while self.running.load(Ordering::Acquire) {
            if let Some(timer) = report.as_mut() {
                if timer.try_fire() {
                    collect_stats(
                        &self.stats,
                        self.backend.as_ref(),
                        self.pacer.depth(),
                        self.started.elapsed(),
                    )
                    .log_report();
                }
            }

            let Some(frame) = self.pacer.get_frame(self.poll_timeout) else {
                continue;
            };

            self.pacer.pace();
            if self.backend.send(&frame.data) {
                continue;
            }
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            let encoder = self.backend.statistics();
            if !encoder.state.is_running() {
                tracing::error!(
                    "Encoder stopped, shutting down: {}",
                    encoder.failure_reason().unwrap_or("no diagnostic output")
                );
                self.running.store(false, Ordering::Release);
                break;
            }
            tracing::debug!("Frame {} rejected by encoder", frame.frame_id);
        }

        tracing::debug!("Dispatch loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framebridge_encoder::{EncoderError, EncoderStats, SupervisorState, TransportState};
    use framebridge_protocol::fragment_frame;
    use std::net::UdpSocket;
    use std::sync::atomic::AtomicU64;

    /// Collects frames in memory; fails every send once `fail_after` frames went through
    struct RecordingBackend {
        running: AtomicBool,
        fail_after: Option<u64>,
        fail_start: bool,
        sent: AtomicU64,
        failed: AtomicU64,
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingBackend {
        fn new() -> Self {
            RecordingBackend {
                running: AtomicBool::new(false),
                fail_after: None,
                fail_start: false,
                sent: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                frames: Mutex::new(Vec::new()),
            }
        }
    }

    impl EncoderBackend for RecordingBackend {
        fn start(&self) -> std::result::Result<(), EncoderError> {
            if self.fail_start {
                return Err(EncoderError::MissingPipe("stdin"));
            }
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn send(&self, frame: &[u8]) -> bool {
            let exhausted = self
                .fail_after
                .map_or(false, |limit| self.sent.load(Ordering::SeqCst) >= limit);
            if !self.running.load(Ordering::SeqCst) || exhausted {
                self.running.store(false, Ordering::SeqCst);
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
            EncoderStats {
                state: if self.running.load(Ordering::SeqCst) {
                    SupervisorState::Running {
                        transport: TransportState::Up,
                    }
                } else {
                    SupervisorState::Stopped
                },
                frames_sent: self.sent.load(Ordering::SeqCst),
                frames_failed: self.failed.load(Ordering::SeqCst),
                last_line: Some("mock encoder gave up".to_string()),
                ..EncoderStats::stopped()
            }
        }
    }

    fn test_config() -> BridgeConfig {
        let mut config = BridgeConfig::compressed("127.0.0.1:0".parse().unwrap());
        config.listener.recv_timeout = Duration::from_millis(20);
        config.listener.recv_buffer = 0;
        config.target_fps = 200.0;
        config.queue_capacity = 16;
        config.stats_interval = None;
        config
    }

    fn jpeg(id: u32, len: usize) -> Vec<u8> {
        let mut data: Vec<u8> = (0..len).map(|i| (i as u32 ^ id) as u8).collect();
        data[0] = 0xFF;
        data[1] = 0xD8;
        data
    }

    fn send_frame(socket: &UdpSocket, target: SocketAddr, id: u32, frame: &[u8]) {
        for chunk in fragment_frame(id, frame, 1000, None).unwrap() {
            socket.send_to(&chunk.to_bytes(), target).unwrap();
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_frames_flow_to_backend() {
        let backend = Arc::new(RecordingBackend::new());
        let bridge = Bridge::new(test_config(), backend.clone());
        let addr = bridge.start().unwrap();
        assert_eq!(bridge.local_addr(), Some(addr));

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let frames: Vec<Vec<u8>> = (1..=3).map(|id| jpeg(id, 2500)).collect();
        for (id, frame) in (1..).zip(&frames) {
            send_frame(&socket, addr, id, frame);
            // Keep the producer from outrunning a small queue
            assert!(wait_until(|| backend.frames.lock().len() >= id as usize));
        }

        assert_eq!(*backend.frames.lock(), frames);
        let stats = bridge.statistics();
        assert_eq!(stats.receiver.frames_completed, 3);
        assert_eq!(stats.encoder.frames_sent, 3);
        assert_eq!(stats.quality_score(), 100.0);

        bridge.stop();
        assert!(!bridge.is_running());
        assert!(!backend.running.load(Ordering::SeqCst));
        bridge.stop();
    }

    #[test]
    fn test_encoder_failure_winds_down() {
        let backend = Arc::new(RecordingBackend {
            fail_after: Some(1),
            ..RecordingBackend::new()
        });
        let bridge = Bridge::new(test_config(), backend.clone());
        let addr = bridge.start().unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        send_frame(&socket, addr, 1, &jpeg(1, 1500));
        assert!(wait_until(|| backend.sent.load(Ordering::SeqCst) == 1));
        send_frame(&socket, addr, 2, &jpeg(2, 1500));

        assert!(bridge.wait_timeout(Duration::from_secs(5)));
        assert_eq!(backend.failed.load(Ordering::SeqCst), 1);
        bridge.stop();
    }

    #[test]
    fn test_backend_start_failure_leaves_nothing_running() {
        let backend = Arc::new(RecordingBackend {
            fail_start: true,
            ..RecordingBackend::new()
        });
        let bridge = Bridge::new(test_config(), backend);

        assert!(matches!(bridge.start(), Err(BridgeError::Encoder(_))));
        assert!(!bridge.is_running());
        bridge.stop();
    }

    #[test]
    fn test_restart_after_stop_rejected() {
        let bridge = Bridge::new(test_config(), Arc::new(RecordingBackend::new()));
        bridge.start().unwrap();
        assert!(matches!(bridge.start(), Err(BridgeError::AlreadyRunning)));

        bridge.stop();
        assert!(matches!(bridge.start(), Err(BridgeError::Stopped)));
    }

    #[test]
    fn test_raw_defaults() {
        let config = BridgeConfig::raw("127.0.0.1:5001".parse().unwrap());
        assert_eq!(config.listener.variant, ChunkVariant::Raw);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.reassembly.stale_timeout, Duration::from_secs(2));
        assert_eq!(config.target_fps, 20.0);
    }
}
