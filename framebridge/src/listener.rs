//! UDP packet listener
//!
//! One thread per listener: receive a datagram, parse its chunk header and hand
//! the chunk to the shared reassembler. The socket's short receive timeout
//! bounds how long the loop goes without checking the running flag.

use crate::error::{BridgeError, Result};
use framebridge_io::DatagramSocket;
use framebridge_protocol::chunk::MAX_DATAGRAM_SIZE;
use framebridge_protocol::{Chunk, ChunkVariant, Reassembler, ReceiverStats};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ERROR_BACKOFF: Duration = Duration::from_millis(1);

/// Listener settings
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub addr: SocketAddr,
    pub variant: ChunkVariant,
    pub recv_timeout: Duration,
    /// Kernel receive buffer; 0 keeps the OS default
    pub recv_buffer: usize,
}

impl ListenerConfig {
    pub fn new(addr: SocketAddr, variant: ChunkVariant) -> Self {
        ListenerConfig {
            addr,
            variant,
            recv_timeout: framebridge_io::DEFAULT_RECV_TIMEOUT,
            recv_buffer: framebridge_io::DEFAULT_RECV_BUFFER,
        }
    }
}

/// Handle to a running receive thread
pub struct PacketListener {
    local_addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl PacketListener {
    /// Bind the socket and start receiving
    ///
    /// Binding happens on the caller's thread so a bad address or a port in use
    /// is reported here, once.
    pub fn start(
        config: &ListenerConfig,
        reassembler: Arc<Mutex<Reassembler>>,
        stats: Arc<ReceiverStats>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let socket = DatagramSocket::bind(config.addr, config.recv_timeout)?;
        if config.recv_buffer > 0 {
            if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer) {
                tracing::warn!("Could not set receive buffer to {}: {}", config.recv_buffer, e);
            }
        }
        let local_addr = socket.local_addr()?;
        let variant = config.variant;

        let handle = thread::Builder::new()
            .name("frame-listener".to_string())
            .spawn(move || receive_loop(socket, variant, reassembler, stats, running))
            .map_err(|source| BridgeError::Thread {
                name: "listener",
                source,
            })?;

        tracing::info!("Listening for {:?} frame chunks on {}", variant, local_addr);

        Ok(PacketListener {
            local_addr,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the receive thread; returns once the running flag is cleared
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Listener thread panicked");
            }
        }
    }
}

fn receive_loop(
    socket: DatagramSocket,
    variant: ChunkVariant,
    reassembler: Arc<Mutex<Reassembler>>,
    stats: Arc<ReceiverStats>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let header_size = variant.header_size();

    while running.load(Ordering::Acquire) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(Some(received)) => received,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Receive error: {}", e);
                thread::sleep(ERROR_BACKOFF);
                continue;
            }
        };

        if len < header_size {
            tracing::trace!("Runt datagram ({} bytes) from {}", len, from);
            continue;
        }
        stats.record_packet(len);

        match Chunk::from_bytes(&buf[..len], variant) {
            Ok(chunk) => {
                reassembler.lock().on_chunk(chunk);
            }
            Err(e) => {
                stats.record_malformed();
                tracing::debug!("Malformed chunk from {}: {}", from, e);
            }
        }
    }

    tracing::debug!("Listener stopped");
}
