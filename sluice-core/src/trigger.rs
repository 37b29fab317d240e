use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use likely_stable::unlikely;
use strum_macros::Display;

use crate::metrics::PipelineMetrics;
use crate::record::ParsedRecord;
use crate::watermark::{WatermarkTracker, WATERMARK_UNSTARTED};
use crate::window::{Pane, WindowAssigner, WindowKey};

/// Per-window trigger lifecycle.
///
/// `Open` windows have never fired. The watermark crossing `end` fires the
/// first pane and moves to `WatermarkFired`; any later arrival before close
/// refires and moves to `LateFiring`, repeatedly. `Closed` is terminal: the
/// window's state is released and nothing may touch it again.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TriggerState {
    #[default]
    Open,
    WatermarkFired,
    LateFiring,
    Closed,
}

/// Accumulated contents and trigger position of one live window.
#[derive(Default)]
pub struct WindowState {
    records: Vec<ParsedRecord>,

    state: TriggerState,

    /// Number of panes fired so far.
    firings: u32,
}

impl WindowState {
    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The per-window trigger state machines, one arena for the whole process.
///
/// Windows are created lazily on first record and live in a `DashMap` keyed
/// by `(start, end)`: the entry lock is the per-window mutual exclusion the
/// engine needs, and there is no lock spanning windows. The watermark is the
/// only cross-window shared state and is read lock-free.
///
/// Panes returned by the methods here are already final snapshots; the
/// caller only has to hand them to the emitter.
pub struct TriggerEvaluator {
    assigner: WindowAssigner,

    allowed_lateness_ms: i64,

    watermark: Arc<WatermarkTracker>,

    windows: DashMap<WindowKey, WindowState>,

    metrics: Arc<PipelineMetrics>,
}

impl TriggerEvaluator {
    pub fn new(
        assigner: WindowAssigner,
        allowed_lateness_ms: i64,
        watermark: Arc<WatermarkTracker>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            assigner,
            allowed_lateness_ms,
            watermark,
            windows: DashMap::new(),
            metrics,
        }
    }

    /// Number of live windows. A watermark stall shows up as this number
    /// refusing to shrink.
    pub fn pending_windows(&self) -> usize {
        self.windows.len()
    }

    /// A record is too late once its event time falls below
    /// `watermark - allowed_lateness`. Such records are dropped with a
    /// counted metric and never reach a window.
    #[inline]
    fn is_too_late(&self, event_time_ms: i64, watermark_ms: i64) -> bool {
        watermark_ms != WATERMARK_UNSTARTED
            && event_time_ms < watermark_ms.saturating_sub(self.allowed_lateness_ms)
    }

    /// Assign one batch of parsed records to windows.
    ///
    /// Late data landing in an already-fired window refires it immediately.
    /// Arrivals for the same window within one batch coalesce into a single
    /// firing, so the firing count tracks arrival batches, not elements.
    pub fn on_batch(&self, records: Vec<ParsedRecord>) -> Vec<Pane> {
        let watermark_ms = self.watermark.current();

        // Group by window first; BTreeMap iteration then walks windows in
        // start order, which is the firing order across windows.
        let mut by_window: BTreeMap<WindowKey, Vec<ParsedRecord>> = BTreeMap::new();

        for record in records {
            if unlikely(self.is_too_late(record.event_time_ms, watermark_ms)) {
                PipelineMetrics::inc(&self.metrics.records_dropped_late);
                continue;
            }

            by_window
                .entry(self.assigner.assign(record.event_time_ms))
                .or_default()
                .push(record);
        }

        let mut panes = Vec::new();

        for (key, batch) in by_window {
            let mut entry = self.windows.entry(key).or_default();

            entry.records.extend(batch);

            match entry.state {
                TriggerState::Open => {
                    // First firing waits for the watermark to cross `end`.
                }
                TriggerState::WatermarkFired | TriggerState::LateFiring => {
                    entry.state = TriggerState::LateFiring;
                    entry.firings += 1;
                    PipelineMetrics::inc(&self.metrics.late_firings);

                    panes.push(Pane {
                        window: key,
                        firing_index: entry.firings,
                        records: entry.records.clone(),
                        is_final: false,
                    });
                }
                TriggerState::Closed => {
                    // Closed windows are removed from the arena, so a live
                    // entry is never in this state.
                }
            }
        }

        panes
    }

    /// Evaluate every live window against the current watermark.
    ///
    /// Open windows whose end the watermark has crossed fire their first
    /// pane, exactly once. Windows past `end + allowed_lateness` close and
    /// release their state. Evaluation runs over a sorted snapshot of keys,
    /// window start ascending.
    pub fn on_watermark(&self) -> Vec<Pane> {
        let watermark_ms = self.watermark.current();
        if watermark_ms == WATERMARK_UNSTARTED {
            return Vec::new();
        }

        let mut keys: Vec<WindowKey> = self.windows.iter().map(|entry| *entry.key()).collect();
        keys.sort();

        let mut panes = Vec::new();

        for key in keys {
            let mut close = false;

            if let Some(mut entry) = self.windows.get_mut(&key) {
                // `W - L > end` is `W > end + L` written without overflow
                // near `i64::MAX`, where the drain watermark lives.
                close = watermark_ms.saturating_sub(self.allowed_lateness_ms) > key.end_ms;

                if entry.state == TriggerState::Open && watermark_ms >= key.end_ms {
                    entry.state = TriggerState::WatermarkFired;
                    entry.firings += 1;

                    panes.push(Pane {
                        window: key,
                        firing_index: entry.firings,
                        records: entry.records.clone(),
                        is_final: close,
                    });
                }

                if close {
                    entry.state = TriggerState::Closed;
                }
            }

            if close {
                // The entry guard is dropped; removing while holding it
                // would deadlock on the shard lock.
                self.windows.remove(&key);
            }
        }

        panes
    }

    /// Advance the watermark to infinity and fire/close everything left.
    /// Records arriving after a drain are too late by definition and fall
    /// to the drop path.
    pub fn drain(&self) -> Vec<Pane> {
        self.watermark.advance_to_end();
        self.on_watermark()
    }
}
