//! Timing utilities for the dispatch loop
//!
//! Provides a periodic timer for caller-driven reporting and the frame pacer
//! that holds delivery to a target cadence.

use std::thread;
use std::time::{Duration, Instant};

/// Timer for periodic operations
///
/// Used for statistics reporting from inside a loop that must never block on it.
pub struct Timer {
    interval: Duration,
    last_fire: Instant,
}

impl Timer {
    /// Create a new timer with the given interval
    pub fn new(interval: Duration) -> Self {
        Timer {
            interval,
            last_fire: Instant::now(),
        }
    }

    /// Check if the timer has expired
    pub fn expired(&self) -> bool {
        self.last_fire.elapsed() >= self.interval
    }

    /// Reset the timer
    pub fn reset(&mut self) {
        self.last_fire = Instant::now();
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self) -> bool {
        if self.expired() {
            self.reset();
            true
        } else {
            false
        }
    }
}

/// Holds frame delivery to at most one frame per interval
///
/// Called right before each frame is handed downstream. An early call sleeps
/// the remainder of the interval, never longer than `max_sleep` so shutdown
/// stays responsive. A late call (the consumer fell behind) does not sleep and
/// restarts the reference clock, so lateness is never repaid with a burst.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    max_sleep: Duration,
    last_release: Option<Instant>,
}

impl FramePacer {
    /// Create a pacer for `fps` frames per second
    pub fn new(fps: f64, max_sleep: Duration) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 1.0 };
        FramePacer {
            interval: Duration::from_nanos((1e9 / fps).round() as u64),
            max_sleep,
            last_release: None,
        }
    }

    /// Create a pacer with an explicit frame interval
    pub fn with_interval(interval: Duration, max_sleep: Duration) -> Self {
        FramePacer {
            interval,
            max_sleep,
            last_release: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How long a release at `now` must wait
    pub fn delay_at(&self, now: Instant) -> Duration {
        match self.last_release {
            None => Duration::ZERO,
            Some(last) => self
                .interval
                .saturating_sub(now.saturating_duration_since(last))
                .min(self.max_sleep),
        }
    }

    /// Record a release at `now` without sleeping
    pub fn mark_released(&mut self, now: Instant) {
        self.last_release = Some(now);
    }

    /// Sleep until the next frame may be released, then record the release
    ///
    /// Returns how long it slept.
    pub fn pace(&mut self) -> Duration {
        let delay = self.delay_at(Instant::now());
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.mark_released(Instant::now());
        delay
    }

    /// Forget the last release; the next frame goes out immediately
    pub fn reset(&mut self) {
        self.last_release = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer() {
        let mut timer = Timer::new(Duration::from_millis(10));
        assert!(!timer.expired());

        thread::sleep(Duration::from_millis(11));
        assert!(timer.expired());

        timer.reset();
        assert!(!timer.expired());
    }

    #[test]
    fn test_timer_try_fire() {
        let mut timer = Timer::new(Duration::from_millis(10));
        assert!(!timer.try_fire());

        thread::sleep(Duration::from_millis(11));
        assert!(timer.try_fire());
        assert!(!timer.try_fire()); // Should not fire again immediately
    }

    #[test]
    fn test_pacer_first_frame_immediate() {
        let pacer = FramePacer::new(20.0, Duration::from_millis(50));
        assert_eq!(pacer.interval(), Duration::from_millis(50));
        assert_eq!(pacer.delay_at(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn test_pacer_early_call_waits_remainder() {
        let mut pacer = FramePacer::with_interval(Duration::from_millis(50), Duration::from_millis(50));
        let start = Instant::now();
        pacer.mark_released(start);

        assert_eq!(
            pacer.delay_at(start + Duration::from_millis(20)),
            Duration::from_millis(30)
        );
    }

    #[test]
    fn test_pacer_delay_is_capped() {
        let mut pacer = FramePacer::with_interval(Duration::from_secs(1), Duration::from_millis(25));
        let start = Instant::now();
        pacer.mark_released(start);

        assert_eq!(pacer.delay_at(start), Duration::from_millis(25));
    }

    #[test]
    fn test_pacer_late_call_resets_clock() {
        let mut pacer = FramePacer::with_interval(Duration::from_millis(50), Duration::from_millis(50));
        let start = Instant::now();
        pacer.mark_released(start);

        // 200ms late: no sleep, and no debt carried into the next frame
        let late = start + Duration::from_millis(250);
        assert_eq!(pacer.delay_at(late), Duration::ZERO);
        pacer.mark_released(late);
        assert_eq!(
            pacer.delay_at(late + Duration::from_millis(10)),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn test_pacer_holds_cadence() {
        let mut pacer = FramePacer::new(100.0, Duration::from_millis(50));
        let start = Instant::now();
        for _ in 0..5 {
            pacer.pace();
        }

        // Four full intervals between five releases
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    proptest::proptest! {
        #[test]
        fn prop_pacer_delay_bounded(
            interval_ms in 1u64..1000,
            max_sleep_ms in 0u64..1000,
            elapsed_ms in 0u64..5000,
        ) {
            let interval = Duration::from_millis(interval_ms);
            let max_sleep = Duration::from_millis(max_sleep_ms);
            let mut pacer = FramePacer::with_interval(interval, max_sleep);
            let start = Instant::now();
            pacer.mark_released(start);

            let delay = pacer.delay_at(start + Duration::from_millis(elapsed_ms));
            proptest::prop_assert!(delay <= interval.min(max_sleep));
            if elapsed_ms >= interval_ms {
                proptest::prop_assert_eq!(delay, Duration::ZERO);
            }
        }
    }

    #[test]
    fn test_pacer_rejects_bad_fps() {
        assert_eq!(
            FramePacer::new(0.0, Duration::ZERO).interval(),
            Duration::from_secs(1)
        );
        assert_eq!(
            FramePacer::new(f64::NAN, Duration::ZERO).interval(),
            Duration::from_secs(1)
        );
    }
}
