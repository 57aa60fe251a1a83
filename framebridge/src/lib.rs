//! Frame Bridge
//!
//! Receives chunked video frames over UDP, reassembles them under bounded
//! memory, paces them to a target frame rate and feeds them to an encoder.
//!
//! ```no_run
//! use framebridge::{Bridge, BridgeConfig, EncoderCommand, ProcessSupervisor, SupervisorConfig};
//! use std::sync::Arc;
//!
//! let encoder = ProcessSupervisor::new(SupervisorConfig::new(EncoderCommand::new("cat")));
//! let bridge = Bridge::new(BridgeConfig::default(), Arc::new(encoder));
//! bridge.start()?;
//! bridge.wait();
//! bridge.stop();
//! # Ok::<(), framebridge::BridgeError>(())
//! ```

pub use framebridge_encoder as encoder;
pub use framebridge_io as io;
pub use framebridge_protocol as protocol;

pub mod error;
pub mod listener;
pub mod pacer;
pub mod pipeline;
pub mod stats;
pub mod sweeper;

pub use error::{BridgeError, Result};
pub use listener::{ListenerConfig, PacketListener};
pub use pacer::Pacer;
pub use pipeline::{Bridge, BridgeConfig, DEFAULT_COMPRESSED_ADDR, DEFAULT_RAW_ADDR};
pub use stats::{BridgeStats, ENCODER_HEALTH_THRESHOLD};
pub use sweeper::Sweeper;

// Re-export commonly used types
pub use encoder::{EncoderBackend, EncoderCommand, EncoderStats, ProcessSupervisor, SupervisorConfig};
pub use protocol::{ChunkVariant, CompleteFrame, FrameValidation, ReassemblyConfig, ReceiverSnapshot};
