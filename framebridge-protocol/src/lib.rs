//! Frame Bridge Protocol Core
//!
//! This crate implements the chunk wire format, frame validation, reassembly of
//! chunked frames with bounded partial state, the drop-oldest frame queue, and
//! the receive-side statistics shared by the rest of the pipeline.

pub mod chunk;
pub mod frame;
pub mod queue;
pub mod reassembly;
pub mod stats;

pub use chunk::{fragment_frame, Chunk, ChunkError, ChunkHeader, ChunkVariant};
pub use frame::{is_jpeg, CompleteFrame, FrameFormat, FrameValidation, RawFrameInfo};
pub use queue::FrameQueue;
pub use reassembly::{ChunkOutcome, Reassembler, ReassemblyConfig};
pub use stats::{ReceiverSnapshot, ReceiverStats};
