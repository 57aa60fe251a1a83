//! Encoder backend capability
//!
//! The dispatch loop only needs four things from whatever publishes frames:
//! start it, hand it a frame, stop it, and ask how it is doing. Keeping that
//! surface a trait lets a local subprocess, a remote service or an in-process
//! encoder sit behind the same pacing core.

use crate::error::EncoderError;
use std::time::Duration;

/// Supervisor's belief about the downstream publish connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Up,
    Down,
}

/// Encoder lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Running { transport: TransportState },
}

impl SupervisorState {
    pub fn is_running(&self) -> bool {
        matches!(self, SupervisorState::Running { .. })
    }
}

/// Encoder-side statistics
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderStats {
    pub state: SupervisorState,
    pub frames_sent: u64,
    pub frames_failed: u64,
    /// Time since the last successful start
    pub elapsed: Duration,
    /// Last connection-lost diagnostic
    pub last_error: Option<String>,
    /// Last non-empty diagnostic line of any kind
    pub last_line: Option<String>,
}

impl EncoderStats {
    pub fn stopped() -> Self {
        EncoderStats {
            state: SupervisorState::Stopped,
            frames_sent: 0,
            frames_failed: 0,
            elapsed: Duration::ZERO,
            last_error: None,
            last_line: None,
        }
    }

    pub fn transport_up(&self) -> bool {
        matches!(
            self.state,
            SupervisorState::Running {
                transport: TransportState::Up
            }
        )
    }

    /// Frames sent per second since start, elapsed time floored at one second
    pub fn fps(&self) -> f64 {
        self.frames_sent as f64 / self.elapsed.as_secs_f64().max(1.0)
    }

    /// Percentage of send attempts that succeeded, 100.0 before any attempt
    pub fn success_rate(&self) -> f64 {
        let attempted = self.frames_sent + self.frames_failed;
        if attempted == 0 {
            return 100.0;
        }
        self.frames_sent as f64 / attempted as f64 * 100.0
    }

    /// Most useful line to report when the encoder has failed
    pub fn failure_reason(&self) -> Option<&str> {
        self.last_error.as_deref().or(self.last_line.as_deref())
    }
}

/// Something that consumes complete frames downstream of the pacer
pub trait EncoderBackend: Send + Sync {
    /// Bring the backend up; fatal failures are reported once here
    fn start(&self) -> Result<(), EncoderError>;

    /// Hand over one frame; false when the frame was not accepted
    fn send(&self, frame: &[u8]) -> bool;

    /// Shut down; idempotent and callable from any state
    fn stop(&self);

    fn statistics(&self) -> EncoderStats;

    fn is_running(&self) -> bool {
        self.statistics().state.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_without_frames() {
        let stats = EncoderStats::stopped();
        assert_eq!(stats.success_rate(), 100.0);
        assert_eq!(stats.fps(), 0.0);
        assert!(!stats.transport_up());
    }

    #[test]
    fn test_rates() {
        let stats = EncoderStats {
            state: SupervisorState::Running {
                transport: TransportState::Up,
            },
            frames_sent: 90,
            frames_failed: 10,
            elapsed: Duration::from_secs(10),
            last_error: None,
            last_line: Some("frame=90".to_string()),
        };

        assert!((stats.success_rate() - 90.0).abs() < f64::EPSILON);
        assert!((stats.fps() - 9.0).abs() < f64::EPSILON);
        assert!(stats.transport_up());
        assert_eq!(stats.failure_reason(), Some("frame=90"));
    }

    #[test]
    fn test_failure_reason_prefers_connection_error() {
        let stats = EncoderStats {
            last_error: Some("Connection refused".to_string()),
            last_line: Some("Conversion failed!".to_string()),
            ..EncoderStats::stopped()
        };
        assert_eq!(stats.failure_reason(), Some("Connection refused"));
    }
}
