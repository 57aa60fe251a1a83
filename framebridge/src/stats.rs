//! Pipeline-wide statistics

use framebridge_encoder::EncoderStats;
use framebridge_protocol::ReceiverSnapshot;
use std::time::Duration;

/// Encoder success rate below which a report carries a warning
pub const ENCODER_HEALTH_THRESHOLD: f64 = 95.0;

/// Point-in-time view of the whole pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeStats {
    pub receiver: ReceiverSnapshot,
    pub encoder: EncoderStats,
    /// Frames waiting between reassembly and the encoder
    pub queue_depth: usize,
    pub uptime: Duration,
}

impl BridgeStats {
    /// The weaker of the receive and encode success rates
    pub fn quality_score(&self) -> f64 {
        self.receiver.success_rate().min(self.encoder.success_rate())
    }

    pub fn encoder_healthy(&self) -> bool {
        self.encoder.success_rate() >= ENCODER_HEALTH_THRESHOLD
    }

    /// Frames handed to the encoder per second of uptime
    pub fn output_fps(&self) -> f64 {
        self.encoder.frames_sent as f64 / self.uptime.as_secs_f64().max(1.0)
    }

    /// Emit the periodic report line
    pub fn log_report(&self) {
        tracing::info!(
            "Stats: packets={} completed={} dropped={} ({:.1}% ok) pending={} queued={} | sent={} failed={} ({:.1}% ok, {:.1} fps) | quality={:.1}%",
            self.receiver.packets_received,
            self.receiver.frames_completed,
            self.receiver.frames_dropped,
            self.receiver.success_rate(),
            self.receiver.pending_frames,
            self.queue_depth,
            self.encoder.frames_sent,
            self.encoder.frames_failed,
            self.encoder.success_rate(),
            self.output_fps(),
            self.quality_score(),
        );

        if !self.encoder_healthy() {
            tracing::warn!(
                "Encoder success rate {:.1}% below {:.0}%",
                self.encoder.success_rate(),
                ENCODER_HEALTH_THRESHOLD
            );
        }
    }
}
