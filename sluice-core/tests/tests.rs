use std::sync::Arc;

use anyhow::Result;

use sluice_core::local_file_reader::{get_test_event_filenames, LocalFileReader};
use sluice_core::metrics::PipelineMetrics;
use sluice_core::record::{classify, Classified};
use sluice_core::sluice::RawRecord;
use sluice_core::tool::{setup_log, MS_PER_DAY};
use sluice_core::trigger::TriggerEvaluator;
use sluice_core::watermark::WatermarkTracker;
use sluice_core::window::{WindowAssigner, WindowKey};

#[test]
fn test_local_file_reader() -> Result<()> {
    setup_log();

    let filenames = get_test_event_filenames(2);

    let reader = LocalFileReader::new(&filenames)?;
    let lines = reader
        .filter(|x| x.is_ok())
        .map(|line| line.unwrap())
        .collect::<Vec<String>>();

    // Two copies of the 10-line fixture.
    assert_eq!(lines.len(), 20);
    assert!(lines[0].contains("\"account_id\":1001"));
    assert_eq!(lines[4], "not a json line");

    Ok(())
}

/// Every fixture line lands on exactly one side of the split.
#[test]
fn test_classify_split_is_total() -> Result<()> {
    setup_log();

    let reader = LocalFileReader::new(&get_test_event_filenames(1))?;

    let mut parsed = 0;
    let mut malformed = 0;

    for line in reader {
        let raw = RawRecord {
            payload: line?,
            arrival_time_ms: 1_000,
        };

        match classify(&raw) {
            Classified::Parsed(_) => parsed += 1,
            Classified::Malformed(_) => malformed += 1,
        }
    }

    assert_eq!(parsed, 8);
    assert_eq!(malformed, 2);

    Ok(())
}

/// The full engine walk-through: classify the fixture, feed the trigger
/// evaluator, advance the watermark, take a late record, then drain.
#[test]
fn test_engine_end_to_end() -> Result<()> {
    setup_log();

    let watermark = Arc::new(WatermarkTracker::new(0));
    let metrics = Arc::new(PipelineMetrics::new());
    let evaluator = TriggerEvaluator::new(
        WindowAssigner::new(90_000),
        10 * MS_PER_DAY,
        watermark.clone(),
        metrics.clone(),
    );

    let reader = LocalFileReader::new(&get_test_event_filenames(1))?;

    let mut records = Vec::new();
    for line in reader {
        let raw = RawRecord {
            payload: line?,
            arrival_time_ms: 7_000,
        };
        if let Classified::Parsed(rec) = classify(&raw) {
            records.push(rec);
        }
    }

    // Fixture event times: 5000, 85000, 91000, 130000, 185000,
    // 7000 (arrival default), 240000, 40000.
    assert!(evaluator.on_batch(records).is_empty());
    assert_eq!(evaluator.pending_windows(), 3);

    // Watermark past the first window only.
    watermark.advance_floor(90_000);
    let panes = evaluator.on_watermark();
    assert_eq!(panes.len(), 1);
    assert_eq!(panes[0].window, WindowKey::new(0, 90_000));
    assert_eq!(panes[0].records.len(), 4);

    // A late record for the fired window refires it with full contents.
    let raw = RawRecord {
        payload: r#"{"account_id":1009,"user_id":9,"action":"deposit","amount":1.0,"event_time_ms":20000}"#
            .to_string(),
        arrival_time_ms: 95_000,
    };
    let late = match classify(&raw) {
        Classified::Parsed(rec) => rec,
        Classified::Malformed(m) => panic!("fixture record failed to parse: {}", m.reason),
    };

    let panes = evaluator.on_batch(vec![late]);
    assert_eq!(panes.len(), 1);
    assert_eq!(panes[0].firing_index, 2);
    assert_eq!(panes[0].records.len(), 5);

    // Drain: the two unfired windows emit final panes; the already-fired
    // window has nothing new and closes silently.
    let panes = evaluator.drain();
    assert_eq!(panes.len(), 2);
    assert!(panes.iter().all(|p| p.is_final && p.firing_index == 1));
    assert_eq!(evaluator.pending_windows(), 0);

    assert_eq!(PipelineMetrics::get(&metrics.late_firings), 1);
    assert_eq!(PipelineMetrics::get(&metrics.records_dropped_late), 0);

    Ok(())
}
