//! Consumer side of the frame queue

use framebridge_io::FramePacer;
use framebridge_protocol::{CompleteFrame, FrameQueue};
use std::time::Duration;

/// Hands queued frames to the dispatch loop at the target cadence
///
/// `get_frame` is the pull side: the next frame within a timeout, or nothing.
/// `pace` is called just before each hand-off and sleeps off whatever remains
/// of the current frame interval.
pub struct Pacer {
    queue: FrameQueue<CompleteFrame>,
    clock: FramePacer,
}

impl Pacer {
    pub fn new(queue: FrameQueue<CompleteFrame>, target_fps: f64, max_sleep: Duration) -> Self {
        Pacer {
            queue,
            clock: FramePacer::new(target_fps, max_sleep),
        }
    }

    /// Next complete frame, waiting at most `timeout`
    pub fn get_frame(&self, timeout: Duration) -> Option<CompleteFrame> {
        self.queue.pop_timeout(timeout)
    }

    /// Sleep until the next release slot; returns the time slept
    pub fn pace(&mut self) -> Duration {
        self.clock.pace()
    }

    pub fn interval(&self) -> Duration {
        self.clock.interval()
    }

    /// Frames waiting in the queue
    pub fn depth(&self) -> usize {
        self.queue.len()
    }
}
