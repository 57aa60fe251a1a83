//! Encoder side of the frame bridge
//!
//! - [`EncoderBackend`]: the capability the dispatch loop drives
//! - [`ProcessSupervisor`]: backend that feeds an external encoder process
//!   through its stdin and watches its stderr
//! - [`diagnostics`]: classification of encoder output lines

pub mod backend;
pub mod command;
pub mod diagnostics;
pub mod error;
pub mod supervisor;

pub use backend::{EncoderBackend, EncoderStats, SupervisorState, TransportState};
pub use command::EncoderCommand;
pub use diagnostics::{classify, Diagnostic, ProgressReport};
pub use error::EncoderError;
pub use supervisor::{ProcessSupervisor, SupervisorConfig, MIN_FRAME_SIZE};
