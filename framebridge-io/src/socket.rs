//! UDP socket wrapper for frame ingest
//!
//! Blocking datagram socket with a short receive timeout, so a receive loop can
//! poll its shutdown flag between reads without spinning.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Default receive timeout for ingest loops
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Kernel receive buffer requested for video ingest
pub const DEFAULT_RECV_BUFFER: usize = 4 * 1024 * 1024;

/// Socket configuration errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Invalid socket address")]
    InvalidAddress,
}

/// Datagram socket used by the packet listener
pub struct DatagramSocket {
    inner: Socket,
}

impl DatagramSocket {
    /// Bind a socket at `addr` with the given receive timeout
    pub fn bind(addr: SocketAddr, recv_timeout: Duration) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket
            .bind(&addr.into())
            .map_err(|source| SocketError::Bind { addr, source })?;

        // A zero timeout would make reads block forever
        let recv_timeout = recv_timeout.max(Duration::from_millis(1));
        socket.set_read_timeout(Some(recv_timeout))?;

        Ok(DatagramSocket { inner: socket })
    }

    /// Set the kernel receive buffer size
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        self.inner.set_recv_buffer_size(size)?;
        // The kernel may clamp (or double) the requested size
        match self.inner.recv_buffer_size() {
            Ok(actual) if actual < size => {
                tracing::debug!("Receive buffer clamped to {} (requested {})", actual, size)
            }
            _ => {}
        }
        Ok(())
    }

    /// Get the kernel receive buffer size
    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(self.inner.recv_buffer_size()?)
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Send a datagram to the given address
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, &target.into())?)
    }

    /// Receive one datagram
    ///
    /// Returns `Ok(None)` when the receive timeout elapses with nothing to read.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        // SAFETY: an initialized byte buffer is a valid MaybeUninit buffer, and
        // recv_from only writes into it.
        let uninit_buf = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, buf.len())
        };

        match self.inner.recv_from(uninit_buf) {
            Ok((n, addr)) => Ok(Some((n, addr.as_socket().ok_or(SocketError::InvalidAddress)?))),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }
}

/// Read timeouts surface as WouldBlock on Unix and TimedOut on Windows
fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}
