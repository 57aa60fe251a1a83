//! Encoder errors

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Encoder is already running")]
    AlreadyRunning,

    #[error("Failed to spawn encoder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Encoder process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
