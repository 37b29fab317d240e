use anyhow::Result;
use log::{error, info};
use std::hash::Hasher;
use std::time::Duration;
use tokio::task;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use fnv::FnvHasher;
use gethostname::gethostname;

use sluice_client::client::Client;
use sluice_core::local_file_reader::LocalFileReader;
use sluice_core::sluice::RawRecord;
use sluice_core::tool::now_ms;

/// Stable-per-process feeder identity, for server-side logs.
pub fn base_feeder_id() -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(gethostname().to_string_lossy().as_bytes());
    hasher.write_u32(std::process::id());
    hasher.finish() as u32
}

/// `RecordFeeder` reads raw lines from one reader and publishes them to the
/// pipeline server in fixed-size batches.
///
/// One `RecordFeeder` instance is responsible for one chunk of the input
/// files. It only publishes; end-of-input signalling is the launcher's job
/// (see the crate docs).
pub struct RecordFeeder<T: Iterator<Item = Result<String>>> {
    feeder_id: u32,

    reader: T,

    batch_size: usize,

    client: Client,
}

impl<T: Iterator<Item = Result<String>>> RecordFeeder<T> {
    pub fn new(feeder_id: u32, reader: T, batch_size: usize, client: Client) -> Self {
        Self {
            feeder_id,
            reader,
            batch_size: batch_size.max(1),
            client,
        }
    }

    /// Publish everything the reader yields. Unreadable lines are logged
    /// and skipped; they never reach the server.
    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<()> {
        info!("RecordFeeder started, feeder_id: {}", self.feeder_id);

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut total: u64 = 0;

        while let Some(line) = self.reader.next() {
            match line {
                Ok(payload) => {
                    batch.push(RawRecord {
                        payload,
                        arrival_time_ms: now_ms(),
                    });

                    if batch.len() >= self.batch_size {
                        total += batch.len() as u64;
                        self.client
                            .publish(self.feeder_id, std::mem::take(&mut batch))
                            .await?;

                        if subsys.is_shutdown_requested() {
                            info!("RecordFeeder shutdown, feeder_id: {}", self.feeder_id);
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to read line, error: {}", e);
                }
            }
        }

        if !batch.is_empty() {
            total += batch.len() as u64;
            self.client.publish(self.feeder_id, batch).await?;
        }

        info!(
            "RecordFeeder done, feeder_id: {}, records: {}",
            self.feeder_id, total
        );

        Ok(())
    }

    /// Replay local files with `num_threads` feeder tasks, then signal end
    /// of input and drain the pipeline.
    pub async fn start_local_file_feeder(
        server_endpoint: &String,
        filenames: &Vec<String>,
        batch_size: usize,
        num_threads: usize,
    ) -> Result<()> {
        let num_threads = num_threads.max(1);
        let chunk_size = (filenames.len() + num_threads - 1) / num_threads;

        let base_id = base_feeder_id();

        let mut handlers = Vec::new();

        for (i, chunk) in filenames.chunks(chunk_size).enumerate() {
            let chunk_files = chunk.to_vec();
            let endpoint = server_endpoint.clone();
            let feeder_id = base_id.wrapping_add(i as u32);

            let handler = task::spawn(async move {
                let reader = LocalFileReader::new(&chunk_files)?;
                let client = Client::new(&endpoint).await?;
                let feeder = RecordFeeder::new(feeder_id, reader, batch_size, client);

                let result = Toplevel::new(|s| async move {
                    s.start(SubsystemBuilder::new("feeder", |a| feeder.run(a)));
                })
                .catch_signals()
                .handle_shutdown_requests(Duration::from_millis(1000))
                .await;

                result.map_err(|e| anyhow::anyhow!("feeder task failed: {}", e))
            });

            handlers.push(handler);
        }

        for handler in handlers {
            handler.await??;
        }

        // All feeders finished: nothing more will arrive at any event time.
        let mut client = Client::new(server_endpoint).await?;
        client.report_progress(base_id, i64::MAX).await?;
        client.drain().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_feeder_id_is_stable() {
        assert_eq!(base_feeder_id(), base_feeder_id());
    }
}
