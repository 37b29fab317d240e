use anyhow::Result;
use dashmap::DashMap;
use log::info;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use sluice_core::emitter::PaneSink;
use sluice_core::window::{Pane, WindowKey};

/// Primary sink: the windowed account table as a directory of JSON-line
/// files, one file per window key.
///
/// Panes are accumulating, so every firing carries the full window contents
/// and the file is replaced wholesale. The write goes through a temp file
/// and a rename: a reader sees the previous pane or the new one, never a
/// half-written file. That makes repeated delivery of the same window key
/// an upsert, which is exactly what the trigger needs from its sink.
pub struct WindowTableWriter {
    dir: PathBuf,

    /// Highest firing index written per window. An older pane arriving
    /// after a newer one would shrink the row set, so it is skipped.
    last_firing: DashMap<WindowKey, u32>,
}

impl WindowTableWriter {
    pub fn new(dir: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;

        Ok(Self {
            dir: PathBuf::from(dir),
            last_firing: DashMap::new(),
        })
    }

    fn window_path(&self, window: &WindowKey) -> PathBuf {
        self.dir.join(format!("window-{}.jsonl", window.to_string()))
    }

    fn is_stale(&self, pane: &Pane) -> bool {
        match self.last_firing.get(&pane.window) {
            Some(prev) => *prev >= pane.firing_index,
            None => false,
        }
    }
}

#[tonic::async_trait]
impl PaneSink for WindowTableWriter {
    async fn write_pane(&self, pane: &Pane) -> Result<()> {
        if self.is_stale(pane) {
            info!(
                "skip stale pane, window: {}, firing_index: {}",
                pane.window.to_string(),
                pane.firing_index
            );
            return Ok(());
        }

        let path = self.window_path(&pane.window);
        let tmp_path = self.dir.join(format!(
            "window-{}.jsonl.tmp",
            pane.window.to_string()
        ));

        {
            let mut file = fs::File::create(&tmp_path)?;

            for record in &pane.records {
                let line = serde_json::to_string(&record.event)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }

            file.sync_all()?;
        }

        fs::rename(&tmp_path, &path)?;

        info!(
            "wrote pane, window: {}, firing_index: {}, records: {}, is_final: {}",
            pane.window.to_string(),
            pane.firing_index,
            pane.records.len(),
            pane.is_final
        );

        if pane.is_final {
            // Nothing more can fire for this window.
            self.last_firing.remove(&pane.window);
        } else {
            self.last_firing.insert(pane.window, pane.firing_index);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::record::{AccountEvent, ParsedRecord};
    use sluice_core::tool::setup_log;
    use rand::Rng;

    fn test_dir() -> String {
        let suffix: u32 = rand::thread_rng().gen();
        std::env::temp_dir()
            .join(format!("sluice_pane_writer_{}", suffix))
            .to_string_lossy()
            .to_string()
    }

    fn record(event_time_ms: i64) -> ParsedRecord {
        ParsedRecord {
            event: AccountEvent {
                account_id: 1,
                user_id: 1,
                action: "deposit".to_string(),
                amount: 1.0,
                event_time_ms: Some(event_time_ms),
            },
            event_time_ms,
        }
    }

    fn pane(firing_index: u32, records: Vec<ParsedRecord>) -> Pane {
        Pane {
            window: WindowKey::new(0, 90_000),
            firing_index,
            records,
            is_final: false,
        }
    }

    #[tokio::test]
    async fn test_refiring_overwrites_window_file() -> Result<()> {
        setup_log();

        let dir = test_dir();
        let writer = WindowTableWriter::new(&dir)?;

        writer
            .write_pane(&pane(1, vec![record(5_000), record(85_000)]))
            .await?;

        let path = writer.window_path(&WindowKey::new(0, 90_000));
        assert_eq!(fs::read_to_string(&path)?.lines().count(), 2);

        // The accumulating refire replaces the file with the superset.
        writer
            .write_pane(&pane(2, vec![record(5_000), record(85_000), record(40_000)]))
            .await?;
        assert_eq!(fs::read_to_string(&path)?.lines().count(), 3);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_pane_is_skipped() -> Result<()> {
        setup_log();

        let dir = test_dir();
        let writer = WindowTableWriter::new(&dir)?;

        writer
            .write_pane(&pane(2, vec![record(5_000), record(40_000)]))
            .await?;

        // A lower firing index must not shrink the row set.
        writer.write_pane(&pane(1, vec![record(5_000)])).await?;

        let path = writer.window_path(&WindowKey::new(0, 90_000));
        assert_eq!(fs::read_to_string(&path)?.lines().count(), 2);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
