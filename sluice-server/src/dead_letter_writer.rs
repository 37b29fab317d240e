use anyhow::Result;
use log::info;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use sluice_core::dead_letter::DeadLetterSink;
use sluice_core::record::MalformedRecord;
use sluice_core::tool::now_ms;

/// Dead-letter sink: each flush becomes a new set of uniquely named files
/// under the dead-letter directory, split across a fixed shard count.
///
/// The name carries the flush wall-clock time and a process-local sequence
/// number, so flushes never collide with each other or with files from an
/// earlier run.
pub struct DeadLetterWriter {
    dir: PathBuf,

    shards: usize,

    seq: AtomicU64,
}

impl DeadLetterWriter {
    pub fn new(dir: &str, shards: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;

        Ok(Self {
            dir: PathBuf::from(dir),
            shards: shards.max(1),
            seq: AtomicU64::new(0),
        })
    }
}

#[tonic::async_trait]
impl DeadLetterSink for DeadLetterWriter {
    async fn write_batch(&self, batch: &[MalformedRecord]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let flush_ms = now_ms();

        // Small batches use fewer shards; never an empty file.
        let shards = self.shards.min(batch.len()).max(1);
        let chunk_size = (batch.len() + shards - 1) / shards;

        for (shard, chunk) in batch.chunks(chunk_size).enumerate() {
            let path = self.dir.join(format!(
                "deadletter-{}-{:05}-{:02}-of-{:02}.jsonl",
                flush_ms, seq, shard, shards
            ));

            let mut file = fs::File::create(&path)?;

            for record in chunk {
                let line = serde_json::to_string(record)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }

            file.sync_all()?;
        }

        info!(
            "wrote dead letter flush, seq: {}, records: {}, shards: {}",
            seq,
            batch.len(),
            shards
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::tool::setup_log;
    use rand::Rng;

    fn test_dir() -> String {
        let suffix: u32 = rand::thread_rng().gen();
        std::env::temp_dir()
            .join(format!("sluice_dead_letter_{}", suffix))
            .to_string_lossy()
            .to_string()
    }

    fn malformed(payload: &str) -> MalformedRecord {
        MalformedRecord {
            payload: payload.to_string(),
            reason: "expected value".to_string(),
            arrival_time_ms: 1_000,
        }
    }

    fn list_files(dir: &str) -> Vec<String> {
        let mut files: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_flushes_never_collide() -> Result<()> {
        setup_log();

        let dir = test_dir();
        let writer = DeadLetterWriter::new(&dir, 1)?;

        writer.write_batch(&[malformed("a")]).await?;
        writer.write_batch(&[malformed("b")]).await?;

        let files = list_files(&dir);
        assert_eq!(files.len(), 2);
        assert_ne!(files[0], files[1]);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_splits_across_shards() -> Result<()> {
        setup_log();

        let dir = test_dir();
        let writer = DeadLetterWriter::new(&dir, 3)?;

        let batch: Vec<MalformedRecord> =
            (0..7).map(|i| malformed(&format!("bad_{}", i))).collect();
        writer.write_batch(&batch).await?;

        let files = list_files(&dir);
        assert_eq!(files.len(), 3);

        // Union of the shard files is the whole batch.
        let mut lines = Vec::new();
        for file in &files {
            let content = fs::read_to_string(PathBuf::from(&dir).join(file))?;
            lines.extend(content.lines().map(|l| l.to_string()));
        }
        assert_eq!(lines.len(), 7);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_small_batch_uses_fewer_shards() -> Result<()> {
        setup_log();

        let dir = test_dir();
        let writer = DeadLetterWriter::new(&dir, 10)?;

        writer.write_batch(&[malformed("a"), malformed("b")]).await?;

        assert_eq!(list_files(&dir).len(), 2);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
