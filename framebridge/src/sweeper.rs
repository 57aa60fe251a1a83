//! Periodic staleness sweep of the partial-frame table

use crate::error::{BridgeError, Result};
use crossbeam::channel::{self, Sender};
use framebridge_protocol::Reassembler;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Background thread that expires stale partial frames on a fixed tick,
/// independent of packet arrivals
pub struct Sweeper {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn start(interval: Duration, reassembler: Arc<Mutex<Reassembler>>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval.max(Duration::from_millis(1)));

        let handle = thread::Builder::new()
            .name("frame-sweeper".to_string())
            .spawn(move || loop {
                crossbeam::select! {
                    recv(ticker) -> _ => {
                        let expired = reassembler.lock().sweep();
                        if expired > 0 {
                            tracing::debug!("Sweep expired {} partial frames", expired);
                        }
                    }
                    // Disconnected when the handle is stopped or dropped
                    recv(shutdown_rx) -> _ => break,
                }
            })
            .map_err(|source| BridgeError::Thread {
                name: "sweeper",
                source,
            })?;

        Ok(Sweeper {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the sweep thread and wait for it; idempotent
    pub fn stop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Sweeper thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
