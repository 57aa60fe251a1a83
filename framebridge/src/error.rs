//! Pipeline errors

use framebridge_encoder::EncoderError;
use framebridge_io::SocketError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Listener error: {0}")]
    Socket(#[from] SocketError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Bridge is already running")]
    AlreadyRunning,

    #[error("Bridge has been stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
