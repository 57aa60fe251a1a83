//! Frame Bridge CLI Library
//!
//! Shared functionality for the frame-bridge command-line tools.

pub mod config;
pub mod stats;

pub use config::{Config, ConfigError, EncoderSection, Validation, Variant};
pub use stats::{display_summary, format_bytes, format_duration};
