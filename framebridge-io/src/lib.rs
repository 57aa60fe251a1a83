//! Frame Bridge I/O
//!
//! Network and timing primitives for the ingest side: a UDP socket wrapper with
//! a short receive timeout, a periodic timer, and the frame pacer.

pub mod socket;
pub mod time;

pub use socket::{DatagramSocket, SocketError, DEFAULT_RECV_BUFFER, DEFAULT_RECV_TIMEOUT};
pub use time::{FramePacer, Timer};
