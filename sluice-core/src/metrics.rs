use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

use crate::watermark::WATERMARK_UNSTARTED;

/// Pipeline counters.
///
/// Dropped data is an accepted, bounded trade-off of the lateness bound, but
/// it must stay observable, so every drop lands in a counter here. The
/// pending-window count is not a counter: it is read from the live arena and
/// passed in where needed, since a stalled watermark shows up as that number
/// refusing to go down.
#[derive(Default)]
pub struct PipelineMetrics {
    pub records_parsed: AtomicU64,
    pub records_malformed: AtomicU64,

    /// Records older than `watermark - allowed_lateness` at assignment time.
    pub records_dropped_late: AtomicU64,

    /// Panes durably accepted by the sink.
    pub panes_emitted: AtomicU64,

    pub late_firings: AtomicU64,

    pub dead_letters_flushed: AtomicU64,
    pub dead_letter_batches: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn log_summary(&self, pending_windows: usize, watermark_ms: i64) {
        let watermark = if watermark_ms == WATERMARK_UNSTARTED {
            "unstarted".to_string()
        } else {
            watermark_ms.to_string()
        };

        info!(
            "pipeline stats, parsed: {}, malformed: {}, dropped_late: {}, panes: {}, late_firings: {}, dead_letters: {} in {} batches, pending_windows: {}, watermark_ms: {}",
            Self::get(&self.records_parsed),
            Self::get(&self.records_malformed),
            Self::get(&self.records_dropped_late),
            Self::get(&self.panes_emitted),
            Self::get(&self.late_firings),
            Self::get(&self.dead_letters_flushed),
            Self::get(&self.dead_letter_batches),
            pending_windows,
            watermark,
        );
    }
}
