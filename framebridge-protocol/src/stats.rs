//! Receive-side statistics
//!
//! Counters are plain atomics so the receive loop, the sweeper and any
//! reporting thread can update and read them without sharing a lock.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Live receive-side counters
#[derive(Debug, Default)]
pub struct ReceiverStats {
    packets_received: AtomicU64,
    packets_malformed: AtomicU64,
    bytes_received: AtomicU64,
    frames_completed: AtomicU64,
    frames_dropped: AtomicU64,
    frames_expired: AtomicU64,
    frames_evicted: AtomicU64,
    frames_invalid: AtomicU64,
    duplicate_chunks: AtomicU64,
    frames_overwritten: AtomicU64,
    pending_frames: AtomicUsize,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a datagram that carried a parseable chunk header
    pub fn record_packet(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.packets_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.frames_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Frame failed its structural check after reassembly
    pub fn record_invalid(&self) {
        self.frames_invalid.fetch_add(1, Ordering::Relaxed);
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Partial frames purged by the staleness sweep
    pub fn record_expired(&self, count: usize) {
        self.frames_expired.fetch_add(count as u64, Ordering::Relaxed);
        self.frames_dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Partial frames evicted because the pending table hit its ceiling
    pub fn record_evicted(&self, count: usize) {
        self.frames_evicted.fetch_add(count as u64, Ordering::Relaxed);
        self.frames_dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed frame pushed out of a full queue before it was consumed
    pub fn record_overwritten(&self) {
        self.frames_overwritten.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pending_frames(&self, pending: usize) {
        self.pending_frames.store(pending, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_malformed: self.packets_malformed.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_expired: self.frames_expired.load(Ordering::Relaxed),
            frames_evicted: self.frames_evicted.load(Ordering::Relaxed),
            frames_invalid: self.frames_invalid.load(Ordering::Relaxed),
            duplicate_chunks: self.duplicate_chunks.load(Ordering::Relaxed),
            frames_overwritten: self.frames_overwritten.load(Ordering::Relaxed),
            pending_frames: self.pending_frames.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReceiverStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverSnapshot {
    pub packets_received: u64,
    pub packets_malformed: u64,
    pub bytes_received: u64,
    pub frames_completed: u64,
    /// Sum of expired, evicted and invalid frames
    pub frames_dropped: u64,
    pub frames_expired: u64,
    pub frames_evicted: u64,
    pub frames_invalid: u64,
    pub duplicate_chunks: u64,
    pub frames_overwritten: u64,
    pub pending_frames: usize,
}

impl ReceiverSnapshot {
    /// Frames that reached a final outcome
    pub fn frames_attempted(&self) -> u64 {
        self.frames_completed + self.frames_dropped
    }

    /// Percentage of attempted frames that completed, 100.0 when none were attempted
    pub fn success_rate(&self) -> f64 {
        let attempted = self.frames_attempted();
        if attempted == 0 {
            return 100.0;
        }
        self.frames_completed as f64 / attempted as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_without_frames() {
        let stats = ReceiverStats::new();
        assert_eq!(stats.snapshot().success_rate(), 100.0);
    }

    #[test]
    fn test_success_rate() {
        let stats = ReceiverStats::new();
        for _ in 0..3 {
            stats.record_completed();
        }
        stats.record_expired(1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_attempted(), 4);
        assert!((snapshot.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_drop_reasons_roll_up() {
        let stats = ReceiverStats::new();
        stats.record_expired(2);
        stats.record_evicted(3);
        stats.record_invalid();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_dropped, 6);
        assert_eq!(snapshot.frames_expired, 2);
        assert_eq!(snapshot.frames_evicted, 3);
        assert_eq!(snapshot.frames_invalid, 1);
        assert_eq!(snapshot.success_rate(), 0.0);
    }

    #[test]
    fn test_packet_accounting() {
        let stats = ReceiverStats::new();
        stats.record_packet(100);
        stats.record_packet(50);
        stats.record_malformed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_received, 2);
        assert_eq!(snapshot.bytes_received, 150);
        assert_eq!(snapshot.packets_malformed, 1);
    }
}
