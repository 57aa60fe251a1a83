//! Frame reassembly from out-of-order chunks
//!
//! Chunks are grouped by frame id into partial frames. A partial frame is
//! destroyed in exactly one of three ways:
//!
//! - **Completion**: every index `0..total_chunks` has arrived; the payloads are
//!   joined, validated, and pushed to the [`FrameQueue`].
//! - **Expiry**: [`Reassembler::sweep`] finds it older than the stale timeout.
//! - **Eviction**: a new frame arrives while the table is at `max_pending`; the
//!   oldest fraction of partial frames is discarded to make room.
//!
//! Memory is therefore bounded by `max_pending` regardless of how chunks
//! arrive, and staleness by the sweep interval plus the stale timeout.

use crate::chunk::Chunk;
use crate::frame::{CompleteFrame, FrameValidation, RawFrameInfo};
use crate::queue::FrameQueue;
use crate::stats::ReceiverStats;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Completed frame ids remembered so late duplicates do not start a new partial frame
///
/// Entries also expire after the stale timeout, so a producer that restarts and
/// reuses ids loses at most that long of frames.
const RECENT_COMPLETED_WINDOW: usize = 64;

/// Reassembly limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReassemblyConfig {
    /// Ceiling on live partial frames
    pub max_pending: usize,
    /// Partial frames older than this are purged by the sweep
    pub stale_timeout: Duration,
    /// Share of `max_pending` discarded when the ceiling is hit (0.0 to 1.0)
    pub eviction_fraction: f64,
    /// Check applied to each joined frame
    pub validation: FrameValidation,
}

impl ReassemblyConfig {
    /// Limits for the JPEG stream
    pub fn compressed() -> Self {
        ReassemblyConfig {
            max_pending: 200,
            stale_timeout: Duration::from_secs(1),
            eviction_fraction: 0.25,
            validation: FrameValidation::Jpeg,
        }
    }

    /// Limits for the raw stream, whose frames are much larger
    pub fn raw() -> Self {
        ReassemblyConfig {
            max_pending: 20,
            stale_timeout: Duration::from_secs(2),
            eviction_fraction: 0.5,
            validation: FrameValidation::None,
        }
    }

    /// Number of partial frames kept after a ceiling eviction
    ///
    /// Always strictly below `max_pending` so at least one frame is evicted.
    pub fn keep_after_eviction(&self) -> usize {
        let fraction = self.eviction_fraction.clamp(0.0, 1.0);
        let keep = (self.max_pending as f64 * (1.0 - fraction)).floor() as usize;
        keep.min(self.max_pending.saturating_sub(1))
    }
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self::compressed()
    }
}

/// In-progress reassembly state for one frame id
#[derive(Debug)]
struct PartialFrame {
    frame_id: u32,
    chunks: Vec<Option<Bytes>>,
    received: usize,
    created_at: Instant,
    raw: Option<RawFrameInfo>,
}

impl PartialFrame {
    fn new(frame_id: u32, total_chunks: u8, raw: Option<RawFrameInfo>, now: Instant) -> Self {
        PartialFrame {
            frame_id,
            chunks: vec![None; total_chunks as usize],
            received: 0,
            created_at: now,
            raw,
        }
    }

    fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Store a payload; returns true if the index was already filled
    fn insert(&mut self, index: usize, payload: Bytes) -> bool {
        let duplicate = self.chunks[index].is_some();
        if !duplicate {
            self.received += 1;
        }
        self.chunks[index] = Some(payload);
        duplicate
    }

    fn is_complete(&self) -> bool {
        self.received == self.total_chunks()
    }

    fn assemble(self) -> Bytes {
        let size = self.chunks.iter().flatten().map(Bytes::len).sum();
        let mut frame = BytesMut::with_capacity(size);
        for payload in self.chunks.iter().flatten() {
            frame.extend_from_slice(payload);
        }
        frame.freeze()
    }

    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Result of feeding one chunk to the reassembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Frame still waiting for chunks
    Pending,
    /// Frame completed, validated and queued
    Completed { frame_id: u32, size: usize },
    /// Frame completed but failed validation and was dropped
    Rejected { frame_id: u32 },
    /// Chunk ignored (late duplicate of a finished frame, or index beyond
    /// the frame's first-seen chunk count)
    Ignored,
}

/// Per-frame reassembly table
///
/// Not internally synchronized; callers sharing it between the receive loop and
/// the sweeper wrap it in a mutex.
pub struct Reassembler {
    pending: HashMap<u32, PartialFrame>,
    recent_completed: VecDeque<(u32, Instant)>,
    config: ReassemblyConfig,
    output: FrameQueue<CompleteFrame>,
    stats: Arc<ReceiverStats>,
}

impl Reassembler {
    pub fn new(
        config: ReassemblyConfig,
        output: FrameQueue<CompleteFrame>,
        stats: Arc<ReceiverStats>,
    ) -> Self {
        Reassembler {
            pending: HashMap::with_capacity(config.max_pending.max(1)),
            recent_completed: VecDeque::with_capacity(RECENT_COMPLETED_WINDOW),
            config: ReassemblyConfig {
                max_pending: config.max_pending.max(1),
                ..config
            },
            output,
            stats,
        }
    }

    pub fn config(&self) -> &ReassemblyConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<ReceiverStats> {
        &self.stats
    }

    /// Number of live partial frames
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, frame_id: u32) -> bool {
        self.pending.contains_key(&frame_id)
    }

    /// Feed a chunk received now
    pub fn on_chunk(&mut self, chunk: Chunk) -> ChunkOutcome {
        self.on_chunk_at(chunk, Instant::now())
    }

    /// Feed a chunk received at `now`
    pub fn on_chunk_at(&mut self, chunk: Chunk, now: Instant) -> ChunkOutcome {
        let header = chunk.header;
        let frame_id = header.frame_id;

        if !self.pending.contains_key(&frame_id) {
            self.forget_completed_before(now);
            if self.recent_completed.iter().any(|&(id, _)| id == frame_id) {
                self.stats.record_duplicate();
                tracing::trace!("Late chunk {} for finished frame {}", header.chunk_index, frame_id);
                return ChunkOutcome::Ignored;
            }
            if self.pending.len() >= self.config.max_pending {
                self.evict_oldest();
            }
            self.pending.insert(
                frame_id,
                PartialFrame::new(frame_id, header.total_chunks, header.raw, now),
            );
        }

        let Some(partial) = self.pending.get_mut(&frame_id) else {
            return ChunkOutcome::Ignored;
        };

        let index = header.chunk_index as usize;
        if index >= partial.total_chunks() {
            self.stats.record_malformed();
            tracing::debug!(
                "Chunk {} beyond {} chunks for frame {}",
                index,
                partial.total_chunks(),
                frame_id
            );
            return ChunkOutcome::Ignored;
        }

        if partial.insert(index, chunk.payload) {
            self.stats.record_duplicate();
        }

        let outcome = if partial.is_complete() {
            match self.pending.remove(&frame_id) {
                Some(partial) => self.complete(partial, now),
                None => ChunkOutcome::Pending,
            }
        } else {
            ChunkOutcome::Pending
        };

        self.stats.set_pending_frames(self.pending.len());
        outcome
    }

    fn forget_completed_before(&mut self, now: Instant) {
        let timeout = self.config.stale_timeout;
        while let Some(&(_, completed_at)) = self.recent_completed.front() {
            if now.saturating_duration_since(completed_at) <= timeout {
                break;
            }
            self.recent_completed.pop_front();
        }
    }

    fn complete(&mut self, partial: PartialFrame, now: Instant) -> ChunkOutcome {
        let frame_id = partial.frame_id;
        let raw = partial.raw;
        let data = partial.assemble();

        if self.recent_completed.len() >= RECENT_COMPLETED_WINDOW {
            self.recent_completed.pop_front();
        }
        self.recent_completed.push_back((frame_id, now));

        if !self.config.validation.check(&data) {
            tracing::warn!("Invalid frame {} ({} bytes) dropped", frame_id, data.len());
            self.stats.record_invalid();
            return ChunkOutcome::Rejected { frame_id };
        }

        let size = data.len();
        if self
            .output
            .push(CompleteFrame::new(frame_id, data, raw))
            .is_some()
        {
            self.stats.record_overwritten();
        }
        self.stats.record_completed();
        tracing::trace!("Frame {} complete ({} bytes)", frame_id, size);

        ChunkOutcome::Completed { frame_id, size }
    }

    /// Keep only the newest partial frames, dropping the rest
    fn evict_oldest(&mut self) -> usize {
        let keep = self.config.keep_after_eviction();
        if self.pending.len() <= keep {
            return 0;
        }

        let mut by_age: Vec<(u32, Instant)> = self
            .pending
            .values()
            .map(|partial| (partial.frame_id, partial.created_at))
            .collect();
        by_age.sort_by_key(|&(_, created_at)| created_at);

        let evict = self.pending.len() - keep;
        for (frame_id, _) in by_age.into_iter().take(evict) {
            self.pending.remove(&frame_id);
        }

        self.stats.record_evicted(evict);
        tracing::debug!(
            "Pending frame ceiling {} reached, evicted {} oldest",
            self.config.max_pending,
            evict
        );
        evict
    }

    /// Purge partial frames older than the stale timeout
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Purge partial frames that are older than the stale timeout at `now`
    ///
    /// Returns the number of frames purged.
    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let timeout = self.config.stale_timeout;
        let before = self.pending.len();
        self.pending.retain(|_, partial| partial.age(now) <= timeout);
        let expired = before - self.pending.len();

        if expired > 0 {
            self.stats.record_expired(expired);
            self.stats.set_pending_frames(self.pending.len());
            tracing::debug!("Expired {} stale partial frames", expired);
        }
        expired
    }

    /// Drop all partial state (used on shutdown)
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        self.stats.set_pending_frames(0);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{fragment_frame, ChunkHeader};

    fn jpeg(len: usize) -> Vec<u8> {
        let mut data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        data[0] = 0xFF;
        data[1] = 0xD8;
        data
    }

    fn make_chunk(frame_id: u32, total: u8, index: u8, payload: &[u8]) -> Chunk {
        Chunk {
            header: ChunkHeader {
                frame_id,
                total_chunks: total,
                chunk_index: index,
                payload_size: payload.len() as u16,
                raw: None,
            },
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn reassembler(config: ReassemblyConfig) -> (Reassembler, FrameQueue<CompleteFrame>) {
        let queue = FrameQueue::new(16);
        let stats = Arc::new(ReceiverStats::new());
        (Reassembler::new(config, queue.clone(), stats), queue)
    }

    #[test]
    fn test_single_chunk_frame() {
        let (mut reassembler, queue) = reassembler(ReassemblyConfig::compressed());
        let data = jpeg(100);

        let outcome = reassembler.on_chunk(make_chunk(1, 1, 0, &data));

        assert_eq!(outcome, ChunkOutcome::Completed { frame_id: 1, size: 100 });
        assert_eq!(&queue.try_pop().unwrap().data[..], &data[..]);
        assert_eq!(reassembler.pending_count(), 0);
        assert_eq!(reassembler.stats().snapshot().frames_completed, 1);
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let (mut reassembler, queue) = reassembler(ReassemblyConfig::compressed());
        let data = jpeg(1000);
        let mut chunks = fragment_frame(42, &data, 100, None).unwrap();
        chunks.reverse();

        let last = chunks.pop().unwrap();
        for chunk in chunks {
            assert_eq!(reassembler.on_chunk(chunk), ChunkOutcome::Pending);
        }
        assert!(reassembler.is_pending(42));
        assert!(matches!(
            reassembler.on_chunk(last),
            ChunkOutcome::Completed { frame_id: 42, .. }
        ));

        let frame = queue.try_pop().unwrap();
        assert_eq!(frame.frame_id, 42);
        assert_eq!(&frame.data[..], &data[..]);
    }

    #[test]
    fn test_duplicate_chunk_last_write_wins() {
        let (mut reassembler, queue) = reassembler(ReassemblyConfig::compressed());

        reassembler.on_chunk(make_chunk(3, 2, 0, &[0xFF, 0xD8, 1]));
        reassembler.on_chunk(make_chunk(3, 2, 0, &[0xFF, 0xD8, 2]));
        assert!(reassembler.is_pending(3));
        reassembler.on_chunk(make_chunk(3, 2, 1, &[9]));

        let frame = queue.try_pop().unwrap();
        assert_eq!(&frame.data[..], &[0xFF, 0xD8, 2, 9]);
        assert_eq!(reassembler.stats().snapshot().duplicate_chunks, 1);
    }

    #[test]
    fn test_late_duplicate_after_completion_ignored() {
        let (mut reassembler, queue) = reassembler(ReassemblyConfig::compressed());

        reassembler.on_chunk(make_chunk(8, 1, 0, &jpeg(10)));
        assert_eq!(
            reassembler.on_chunk(make_chunk(8, 1, 0, &jpeg(10))),
            ChunkOutcome::Ignored
        );

        assert_eq!(queue.len(), 1);
        assert_eq!(reassembler.pending_count(), 0);
        assert_eq!(reassembler.stats().snapshot().frames_completed, 1);
    }

    #[test]
    fn test_reused_id_accepted_after_stale_timeout() {
        let (mut reassembler, queue) = reassembler(ReassemblyConfig::compressed());
        let timeout = reassembler.config().stale_timeout;
        let start = Instant::now();

        reassembler.on_chunk_at(make_chunk(8, 1, 0, &jpeg(10)), start);
        assert_eq!(
            reassembler.on_chunk_at(make_chunk(8, 1, 0, &jpeg(10)), start + timeout),
            ChunkOutcome::Ignored
        );

        let later = start + timeout + Duration::from_millis(1);
        assert!(matches!(
            reassembler.on_chunk_at(make_chunk(8, 1, 0, &jpeg(12)), later),
            ChunkOutcome::Completed { frame_id: 8, size: 12 }
        ));
        assert_eq!(queue.len(), 2);
        assert_eq!(reassembler.stats().snapshot().frames_completed, 2);
    }

    #[test]
    fn test_invalid_frame_rejected() {
        let (mut reassembler, queue) = reassembler(ReassemblyConfig::compressed());

        let outcome = reassembler.on_chunk(make_chunk(5, 1, 0, b"not a jpeg"));

        assert_eq!(outcome, ChunkOutcome::Rejected { frame_id: 5 });
        assert!(queue.is_empty());
        let snapshot = reassembler.stats().snapshot();
        assert_eq!(snapshot.frames_dropped, 1);
        assert_eq!(snapshot.frames_invalid, 1);
    }

    #[test]
    fn test_raw_frames_skip_validation() {
        let (mut reassembler, queue) = reassembler(ReassemblyConfig::raw());

        let outcome = reassembler.on_chunk(make_chunk(5, 1, 0, b"raw pixels"));

        assert!(matches!(outcome, ChunkOutcome::Completed { .. }));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_stale_frame_expires() {
        let (mut reassembler, queue) = reassembler(ReassemblyConfig::compressed());
        let start = Instant::now();

        reassembler.on_chunk_at(make_chunk(7, 3, 0, &[0xFF, 0xD8]), start);
        reassembler.on_chunk_at(make_chunk(7, 3, 2, &[1]), start);

        assert_eq!(reassembler.sweep_at(start + Duration::from_millis(500)), 0);
        assert!(reassembler.is_pending(7));

        assert_eq!(reassembler.sweep_at(start + Duration::from_millis(1500)), 1);
        assert!(!reassembler.is_pending(7));
        assert!(queue.is_empty());

        let snapshot = reassembler.stats().snapshot();
        assert_eq!(snapshot.frames_dropped, 1);
        assert_eq!(snapshot.frames_expired, 1);
        assert_eq!(snapshot.pending_frames, 0);
    }

    #[test]
    fn test_ceiling_evicts_oldest_quarter() {
        let config = ReassemblyConfig {
            max_pending: 8,
            ..ReassemblyConfig::compressed()
        };
        let (mut reassembler, _queue) = reassembler(config);
        let start = Instant::now();

        for id in 0..8u32 {
            let at = start + Duration::from_millis(id as u64);
            reassembler.on_chunk_at(make_chunk(id, 2, 0, &[0xFF, 0xD8]), at);
        }
        assert_eq!(reassembler.pending_count(), 8);

        reassembler.on_chunk_at(
            make_chunk(100, 2, 0, &[0xFF, 0xD8]),
            start + Duration::from_millis(50),
        );

        // keep floor(8 * 0.75) = 6, then the new frame
        assert_eq!(reassembler.pending_count(), 7);
        assert!(!reassembler.is_pending(0));
        assert!(!reassembler.is_pending(1));
        assert!(reassembler.is_pending(2));
        assert!(reassembler.is_pending(100));
        assert_eq!(reassembler.stats().snapshot().frames_evicted, 2);
    }

    #[test]
    fn test_ceiling_of_one() {
        let config = ReassemblyConfig {
            max_pending: 1,
            ..ReassemblyConfig::compressed()
        };
        let (mut reassembler, _queue) = reassembler(config);

        for id in 0..10u32 {
            reassembler.on_chunk(make_chunk(id, 2, 0, &[0xFF, 0xD8]));
            assert_eq!(reassembler.pending_count(), 1);
        }
        assert_eq!(reassembler.stats().snapshot().frames_evicted, 9);
    }

    #[test]
    fn test_keep_after_eviction() {
        assert_eq!(ReassemblyConfig::compressed().keep_after_eviction(), 150);
        assert_eq!(ReassemblyConfig::raw().keep_after_eviction(), 10);

        let none = ReassemblyConfig {
            eviction_fraction: 0.0,
            max_pending: 4,
            ..ReassemblyConfig::compressed()
        };
        assert_eq!(none.keep_after_eviction(), 3);
    }

    #[test]
    fn test_mismatched_total_uses_first_seen() {
        let (mut reassembler, queue) = reassembler(ReassemblyConfig::compressed());

        reassembler.on_chunk(make_chunk(9, 2, 0, &[0xFF, 0xD8]));
        assert_eq!(
            reassembler.on_chunk(make_chunk(9, 4, 3, &[3])),
            ChunkOutcome::Ignored
        );
        assert!(matches!(
            reassembler.on_chunk(make_chunk(9, 4, 1, &[1])),
            ChunkOutcome::Completed { frame_id: 9, size: 3 }
        ));
        assert_eq!(&queue.try_pop().unwrap().data[..], &[0xFF, 0xD8, 1]);
    }

    #[test]
    fn test_full_queue_counts_overwrite() {
        let queue = FrameQueue::new(1);
        let stats = Arc::new(ReceiverStats::new());
        let mut reassembler =
            Reassembler::new(ReassemblyConfig::compressed(), queue.clone(), stats.clone());

        reassembler.on_chunk(make_chunk(1, 1, 0, &jpeg(4)));
        reassembler.on_chunk(make_chunk(2, 1, 0, &jpeg(4)));

        assert_eq!(queue.try_pop().unwrap().frame_id, 2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_completed, 2);
        assert_eq!(snapshot.frames_overwritten, 1);
    }
}
