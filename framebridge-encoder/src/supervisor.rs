//! External encoder process supervision
//!
//! ```text
//!            start()                    connection-lost line
//! Stopped ───────────▶ Running{Up} ─────────────────────────▶ Running{Down}
//!    ▲                  │    ▲   connection-alive line           │
//!    │   write failure  │    └───────────────────────────────────┤
//!    │   process exit   │                                        │ send()
//!    └──────────────────┴────────────────────────────────────────┘
//! ```
//!
//! `stop()` returns to `Stopped` from any state. The process is spawned with
//! stdin piped for frames and stderr piped for diagnostics; a background thread
//! classifies each stderr line and flips the transport state.

use crate::backend::{EncoderBackend, EncoderStats, SupervisorState, TransportState};
use crate::command::EncoderCommand;
use crate::diagnostics::{classify, Diagnostic};
use crate::error::EncoderError;
use parking_lot::{Mutex, RwLock};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::process::{Child, ChildStderr, ChildStdin, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Smallest frame worth handing to the encoder
pub const MIN_FRAME_SIZE: usize = 10;

/// Progress lines are logged once per this many encoded frames
const PROGRESS_LOG_EVERY: u64 = 100;

/// How long `stop()` waits for the diagnostic reader after the process is gone
const READER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Supervisor settings
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub command: EncoderCommand,
    /// Reject frames that do not start with the JPEG SOI marker
    pub validate_jpeg: bool,
    pub min_frame_size: usize,
    /// Time allowed for a clean exit after stdin closes
    pub graceful_timeout: Duration,
}

impl SupervisorConfig {
    pub fn new(command: EncoderCommand) -> Self {
        SupervisorConfig {
            command,
            validate_jpeg: true,
            min_frame_size: MIN_FRAME_SIZE,
            graceful_timeout: Duration::from_secs(3),
        }
    }
}

/// State shared with the diagnostic reader thread
#[derive(Debug, Default)]
struct SharedState {
    running: AtomicBool,
    /// Bumped on every spawn; readers of earlier processes stop updating state
    generation: AtomicU64,
    transport_up: AtomicBool,
    frames_sent: AtomicU64,
    frames_failed: AtomicU64,
    last_error: RwLock<Option<String>>,
    last_line: RwLock<Option<String>>,
}

impl SharedState {
    fn fail(&self) -> bool {
        self.frames_failed.fetch_add(1, Ordering::Relaxed);
        false
    }
}

/// Owns one external encoder process at a time
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    shared: Arc<SharedState>,
    /// Serializes start/stop
    lifecycle: Mutex<()>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    started_at: Mutex<Option<Instant>>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        ProcessSupervisor {
            config,
            shared: Arc::new(SharedState::default()),
            lifecycle: Mutex::new(()),
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            reader: Mutex::new(None),
            started_at: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn state(&self) -> SupervisorState {
        if !self.shared.running.load(Ordering::SeqCst) {
            return SupervisorState::Stopped;
        }
        let transport = if self.shared.transport_up.load(Ordering::SeqCst) {
            TransportState::Up
        } else {
            TransportState::Down
        };
        SupervisorState::Running { transport }
    }

    /// OS process id of the running encoder
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().map(Child::id)
    }

    fn spawn(&self) -> Result<(), EncoderError> {
        let mut command = self.config.command.to_command();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| EncoderError::Spawn {
            program: self.config.command.program().to_string_lossy().into_owned(),
            source,
        })?;

        let pipes = match (child.stdin.take(), child.stderr.take()) {
            (Some(stdin), Some(stderr)) => Ok((stdin, stderr)),
            (None, _) => Err(EncoderError::MissingPipe("stdin")),
            (_, None) => Err(EncoderError::MissingPipe("stderr")),
        };
        let (stdin, stderr) = match pipes {
            Ok(pipes) => pipes,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.last_error.write() = None;
        *self.shared.last_line.write() = None;
        self.shared.transport_up.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let reader = thread::Builder::new()
            .name("encoder-diagnostics".to_string())
            .spawn(move || read_diagnostics(stderr, shared, generation));
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EncoderError::Io(e));
            }
        };

        tracing::info!(
            "Encoder started (pid {}): {}",
            child.id(),
            self.config.command
        );

        *self.child.lock() = Some(child);
        *self.stdin.lock() = Some(stdin);
        *self.reader.lock() = Some(reader);
        *self.started_at.lock() = Some(Instant::now());
        self.shared.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);

        let Some(mut child) = self.child.lock().take() else {
            return;
        };

        // Closing stdin is the encoder's cue to flush and exit. A writer stuck
        // on a full pipe holds the lock; the kill below unblocks it.
        match self.stdin.try_lock_for(self.config.graceful_timeout) {
            Some(mut stdin) => drop(stdin.take()),
            None => tracing::warn!("Encoder stdin busy, forcing shutdown"),
        }

        match wait_timeout(&mut child, self.config.graceful_timeout) {
            Ok(Some(status)) => tracing::info!("Encoder exited: {}", status),
            Ok(None) => {
                tracing::warn!(
                    "Encoder did not exit within {:?}, terminating",
                    self.config.graceful_timeout
                );
                let _ = child.kill();
                let _ = child.wait();
            }
            Err(e) => {
                tracing::warn!("Failed waiting for encoder: {}", e);
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        self.stdin.lock().take();

        if let Some(reader) = self.reader.lock().take() {
            let deadline = Instant::now() + READER_JOIN_TIMEOUT;
            while !reader.is_finished() && Instant::now() < deadline {
                thread::sleep(EXIT_POLL_INTERVAL);
            }
            if reader.is_finished() {
                let _ = reader.join();
            } else {
                // stderr held open by a grandchild; the reader exits on its own at EOF
                tracing::debug!("Detaching encoder diagnostic reader");
            }
        }

        tracing::info!(
            "Encoder stopped - sent: {}, failed: {}",
            self.shared.frames_sent.load(Ordering::Relaxed),
            self.shared.frames_failed.load(Ordering::Relaxed)
        );
    }

    /// Mark the encoder dead after a downstream failure
    fn halt(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    fn frame_is_valid(&self, frame: &[u8]) -> bool {
        if frame.len() < self.config.min_frame_size {
            tracing::debug!("Frame too small: {} bytes", frame.len());
            return false;
        }
        if self.config.validate_jpeg && !frame.starts_with(&[0xFF, 0xD8]) {
            tracing::error!(
                "Invalid JPEG header: {:02x?} (expected FF D8), frame size: {}",
                frame.get(..2).unwrap_or(frame),
                frame.len()
            );
            return false;
        }
        true
    }
}

impl EncoderBackend for ProcessSupervisor {
    fn start(&self) -> Result<(), EncoderError> {
        let _lifecycle = self.lifecycle.lock();
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(EncoderError::AlreadyRunning);
        }

        // Reap a process that died since the last start
        self.shutdown();
        self.spawn()
    }

    fn send(&self, frame: &[u8]) -> bool {
        if !self.shared.running.load(Ordering::SeqCst) {
            return self.shared.fail();
        }

        if !self.shared.transport_up.load(Ordering::SeqCst) {
            tracing::warn!(
                "Encoder connection is down: {}",
                self.shared
                    .last_error
                    .read()
                    .as_deref()
                    .unwrap_or("unknown error")
            );
            self.halt();
            return self.shared.fail();
        }

        let exit = match self.child.lock().as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        };
        match exit {
            Ok(None) => {}
            Ok(Some(status)) => {
                tracing::warn!("Encoder process died: {}", status);
                self.halt();
                return self.shared.fail();
            }
            Err(e) => {
                tracing::warn!("Encoder process state unknown: {}", e);
                self.halt();
                return self.shared.fail();
            }
        }

        if !self.frame_is_valid(frame) {
            return self.shared.fail();
        }

        let mut stdin = self.stdin.lock();
        let Some(pipe) = stdin.as_mut() else {
            self.halt();
            return self.shared.fail();
        };

        match pipe.write_all(frame).and_then(|_| pipe.flush()) {
            Ok(()) => {
                self.shared.frames_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::error!("Frame send error: {}", e);
                self.halt();
                self.shared.fail()
            }
        }
    }

    fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.shutdown();
    }

    fn statistics(&self) -> EncoderStats {
        EncoderStats {
            state: self.state(),
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            frames_failed: self.shared.frames_failed.load(Ordering::Relaxed),
            elapsed: self
                .started_at
                .lock()
                .map(|started| started.elapsed())
                .unwrap_or_default(),
            last_error: self.shared.last_error.read().clone(),
            last_line: self.shared.last_line.read().clone(),
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wait_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

fn read_diagnostics(stderr: ChildStderr, shared: Arc<SharedState>, generation: u64) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::with_capacity(256);

    loop {
        line.clear();
        match read_segment(&mut reader, &mut line) {
            Ok(0) => break,
            Ok(_) => handle_line(&String::from_utf8_lossy(&line), &shared, generation),
            Err(e) => {
                tracing::debug!("Encoder diagnostic stream error: {}", e);
                break;
            }
        }
    }

    tracing::debug!("Encoder diagnostic stream closed");
}

/// Read up to the next `\n` or `\r`, appending the bytes before it to `out`
///
/// Returns the number of bytes consumed including the delimiter; 0 at EOF.
fn read_segment<R: BufRead>(reader: &mut R, out: &mut Vec<u8>) -> io::Result<usize> {
    let mut consumed = 0;
    loop {
        let (done, used) = {
            let available = match reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok(consumed);
            }
            match available.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(i) => {
                    out.extend_from_slice(&available[..i]);
                    (true, i + 1)
                }
                None => {
                    out.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        reader.consume(used);
        consumed += used;
        if done {
            return Ok(consumed);
        }
    }
}

fn handle_line(line: &str, shared: &SharedState, generation: u64) {
    let line = line.trim();
    if line.is_empty() || shared.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    *shared.last_line.write() = Some(line.to_string());

    let diagnostic = classify(line);
    match diagnostic.transport_signal() {
        Some(false) => {
            shared.transport_up.store(false, Ordering::SeqCst);
            *shared.last_error.write() = Some(line.to_string());
        }
        Some(true) => {
            if !shared.transport_up.swap(true, Ordering::SeqCst) {
                tracing::info!("Encoder connection restored");
            }
        }
        None => {}
    }

    match diagnostic {
        Diagnostic::ConnectionLost => tracing::warn!("Encoder connection issue detected: {}", line),
        Diagnostic::ConnectionAlive => tracing::debug!("Encoder: {}", line),
        Diagnostic::InputError => tracing::error!("Encoder input error: {}", line),
        Diagnostic::Progress(report) => match report.frame {
            Some(frame) if frame > 0 && frame % PROGRESS_LOG_EVERY == 0 => tracing::info!(
                "Encoder progress: frame {}, fps {}, q {}, size {}, speed {}",
                frame,
                report.fps.map_or_else(|| "N/A".to_string(), |fps| fps.to_string()),
                report.quality.as_deref().unwrap_or("N/A"),
                report.size.as_deref().unwrap_or("N/A"),
                report.speed.as_deref().unwrap_or("N/A"),
            ),
            _ => tracing::trace!("Encoder: {}", line),
        },
        Diagnostic::Error => tracing::error!("Encoder: {}", line),
        Diagnostic::Info => tracing::debug!("Encoder: {}", line),
    }
}
