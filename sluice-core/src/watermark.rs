use std::sync::atomic::{AtomicI64, Ordering};

/// Watermark value before any timestamp or progress signal has been seen.
pub const WATERMARK_UNSTARTED: i64 = i64::MIN;

/// Process-wide estimate of "event time below which no more data is
/// expected", in milliseconds since the unix epoch.
///
/// The value is monotone non-decreasing by construction: every update goes
/// through `fetch_max`, so a stale or skewed candidate simply loses. Reads
/// happen on every trigger evaluation and stay lock-free; updates are
/// infrequent (once per published batch, once per progress signal).
pub struct WatermarkTracker {
    current_ms: AtomicI64,

    /// Slack subtracted from observed timestamps to tolerate out-of-order
    /// delivery within a batch boundary.
    allowed_skew_ms: i64,
}

impl WatermarkTracker {
    pub fn new(allowed_skew_ms: i64) -> Self {
        Self {
            current_ms: AtomicI64::new(WATERMARK_UNSTARTED),
            allowed_skew_ms,
        }
    }

    #[inline]
    pub fn current(&self) -> i64 {
        self.current_ms.load(Ordering::Acquire)
    }

    pub fn is_started(&self) -> bool {
        self.current() != WATERMARK_UNSTARTED
    }

    /// Observe the minimum event time of one published batch.
    ///
    /// Candidate is `min_event_time - allowed_skew`. Returns the watermark
    /// after the update.
    pub fn observe_batch(&self, min_event_time_ms: i64) -> i64 {
        let candidate = min_event_time_ms.saturating_sub(self.allowed_skew_ms);
        let prev = self.current_ms.fetch_max(candidate, Ordering::AcqRel);
        prev.max(candidate)
    }

    /// Apply a source progress signal: no record below `floor_ms` will
    /// arrive after this call.
    pub fn advance_floor(&self, floor_ms: i64) -> i64 {
        let prev = self.current_ms.fetch_max(floor_ms, Ordering::AcqRel);
        prev.max(floor_ms)
    }

    /// Force the watermark to infinity. Used by drain and shutdown so every
    /// remaining window fires and closes.
    pub fn advance_to_end(&self) -> i64 {
        self.advance_floor(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_starts_unstarted() {
        let tracker = WatermarkTracker::new(0);
        assert!(!tracker.is_started());
        assert_eq!(tracker.current(), WATERMARK_UNSTARTED);
    }

    #[test]
    fn test_observe_batch_applies_skew() {
        let tracker = WatermarkTracker::new(2_000);

        assert_eq!(tracker.observe_batch(10_000), 8_000);
        assert_eq!(tracker.current(), 8_000);
    }

    #[test]
    fn test_watermark_never_decreases() {
        let tracker = WatermarkTracker::new(0);

        tracker.observe_batch(90_000);
        assert_eq!(tracker.current(), 90_000);

        // A batch of older records must not move the watermark backwards.
        tracker.observe_batch(40_000);
        assert_eq!(tracker.current(), 90_000);

        tracker.advance_floor(50_000);
        assert_eq!(tracker.current(), 90_000);
    }

    #[test]
    fn test_progress_floor_advances_past_observations() {
        let tracker = WatermarkTracker::new(5_000);

        tracker.observe_batch(30_000);
        assert_eq!(tracker.current(), 25_000);

        tracker.advance_floor(90_000);
        assert_eq!(tracker.current(), 90_000);
    }

    #[test]
    fn test_advance_to_end() {
        let tracker = WatermarkTracker::new(1_000);
        tracker.observe_batch(10_000);

        tracker.advance_to_end();
        assert_eq!(tracker.current(), i64::MAX);

        // Still monotone afterwards.
        tracker.observe_batch(10_000);
        assert_eq!(tracker.current(), i64::MAX);
    }

    #[test]
    fn test_skew_does_not_underflow() {
        let tracker = WatermarkTracker::new(1_000);
        tracker.observe_batch(i64::MIN + 10);
        assert_eq!(tracker.current(), WATERMARK_UNSTARTED);
    }
}
