use serde::{Deserialize, Serialize};

use crate::record::ParsedRecord;

/// A fixed-length event-time window, identified by its half-open interval
/// `[start_ms, end_ms)`.
///
/// Keys order by start time, which is also the firing evaluation order
/// across windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl WindowKey {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn contains(&self, event_time_ms: i64) -> bool {
        event_time_ms >= self.start_ms && event_time_ms < self.end_ms
    }

    pub fn to_string(&self) -> String {
        format!("{}_{}", self.start_ms, self.end_ms)
    }
}

/// Maps event times to tumbling windows of fixed duration.
///
/// Windows tile the whole time line: every timestamp belongs to exactly one
/// window, windows never overlap.
#[derive(Debug, Clone, Copy)]
pub struct WindowAssigner {
    duration_ms: i64,
}

impl WindowAssigner {
    /// `duration_ms` must be positive; config validation rejects anything
    /// else before an assigner is ever built.
    pub fn new(duration_ms: i64) -> Self {
        debug_assert!(duration_ms > 0);
        Self { duration_ms }
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    /// Window start is `floor(t / D) * D`. Euclidean division keeps the
    /// floor correct for pre-epoch timestamps.
    pub fn assign(&self, event_time_ms: i64) -> WindowKey {
        let start = event_time_ms.div_euclid(self.duration_ms) * self.duration_ms;
        WindowKey::new(start, start.saturating_add(self.duration_ms))
    }
}

/// One emitted snapshot of a window's contents at a given firing.
///
/// Write-once. On the main path panes are accumulating: `records` is the
/// full window contents at firing time, and each pane replaces the previous
/// pane for the same window key downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pane {
    pub window: WindowKey,

    /// 1-based firing counter per window. Firing 1 is the watermark firing,
    /// everything above is a late firing.
    pub firing_index: u32,

    pub records: Vec<ParsedRecord>,

    /// True when no further firing of this window is possible.
    pub is_final: bool,
}

impl Pane {
    pub fn is_late_firing(&self) -> bool {
        self.firing_index > 1
    }
}
