use anyhow::Result;
use log::info;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_graceful_shutdown::SubsystemHandle;

use crate::metrics::PipelineMetrics;
use crate::record::MalformedRecord;

/// Destination of dead-letter flushes.
///
/// Each call receives one discarding batch and must land it as a new,
/// uniquely named output unit, so repeated flushes never collide.
#[tonic::async_trait]
pub trait DeadLetterSink: Send + Sync + 'static {
    async fn write_batch(&self, batch: &[MalformedRecord]) -> Result<()>;
}

/// Periodic, processing-time flusher for malformed records.
///
/// Completely decoupled from the watermark: the main path can stall
/// indefinitely and malformed records still reach the dead-letter sink.
/// The flush timer runs relative to the first element in the buffer: the
/// first record into an empty buffer arms a deadline one interval out,
/// the flush drains the buffer (discarding policy), and the next record
/// re-arms. Consecutive flushed batches are therefore disjoint and their
/// union is exactly the set of malformed records seen.
pub struct DeadLetterFlusher<S: DeadLetterSink> {
    receiver: async_channel::Receiver<MalformedRecord>,

    sink: Arc<S>,

    flush_interval: Duration,

    buffer: Vec<MalformedRecord>,

    /// Set while the buffer is non-empty.
    deadline: Option<Instant>,

    metrics: Arc<PipelineMetrics>,
}

impl<S: DeadLetterSink> DeadLetterFlusher<S> {
    pub fn new(
        receiver: async_channel::Receiver<MalformedRecord>,
        sink: Arc<S>,
        flush_interval: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            receiver,
            sink,
            flush_interval,
            buffer: Vec::new(),
            deadline: None,
            metrics,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<()> {
        info!(
            "dead letter flusher started, flush interval: {} ms",
            self.flush_interval.as_millis()
        );

        loop {
            let deadline = self.deadline;

            tokio::select! {
                record = self.receiver.recv() => {
                    match record {
                        Ok(record) => {
                            if self.buffer.is_empty() {
                                self.deadline = Some(Instant::now() + self.flush_interval);
                            }
                            self.buffer.push(record);
                        }
                        Err(_) => {
                            info!("malformed record channel closed, dead letter flusher done");
                            break;
                        }
                    }
                },
                _ = async move { sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                    self.flush().await?;
                },
                _ = subsys.on_shutdown_requested() => {
                    info!("dead letter flusher shutdown");

                    while let Ok(record) = self.receiver.try_recv() {
                        self.buffer.push(record);
                    }

                    break;
                }
            }
        }

        // Final drain so nothing is stranded in the buffer.
        self.flush().await?;

        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.deadline = None;

        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch = mem::take(&mut self.buffer);

        info!("flush dead letter batch, records: {}", batch.len());

        self.sink.write_batch(&batch).await?;

        PipelineMetrics::add(&self.metrics.dead_letters_flushed, batch.len() as u64);
        PipelineMetrics::inc(&self.metrics.dead_letter_batches);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::setup_log;
    use std::sync::Mutex;
    use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

    #[derive(Default)]
    struct CollectingSink {
        batches: Mutex<Vec<Vec<MalformedRecord>>>,
    }

    #[tonic::async_trait]
    impl DeadLetterSink for CollectingSink {
        async fn write_batch(&self, batch: &[MalformedRecord]) -> Result<()> {
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    fn malformed(payload: &str) -> MalformedRecord {
        MalformedRecord {
            payload: payload.to_string(),
            reason: "expected value".to_string(),
            arrival_time_ms: 1_000,
        }
    }

    fn start_flusher(
        receiver: async_channel::Receiver<MalformedRecord>,
        sink: Arc<CollectingSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> tokio::task::JoinHandle<()> {
        let flusher =
            DeadLetterFlusher::new(receiver, sink, Duration::from_millis(100), metrics);

        tokio::spawn(async move {
            let _ = Toplevel::new(|s| async move {
                s.start(SubsystemBuilder::new("dead_letter_flusher", |s| {
                    flusher.run(s)
                }));
            })
            .handle_shutdown_requests(Duration::from_millis(1000))
            .await;
        })
    }

    #[tokio::test]
    async fn test_flushes_within_one_interval_of_first_record() -> Result<()> {
        setup_log();

        let (sender, receiver) = async_channel::bounded(16);
        let sink = Arc::new(CollectingSink::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let handle = start_flusher(receiver, sink.clone(), metrics.clone());

        sender.send(malformed("a")).await?;
        sender.send(malformed("b")).await?;

        tokio::time::sleep(Duration::from_millis(300)).await;

        {
            let batches = sink.batches.lock().unwrap();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].len(), 2);
        }

        sender.close();
        handle.await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_batches_are_disjoint_and_complete() -> Result<()> {
        setup_log();

        let (sender, receiver) = async_channel::bounded(16);
        let sink = Arc::new(CollectingSink::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let handle = start_flusher(receiver, sink.clone(), metrics.clone());

        sender.send(malformed("a")).await?;
        tokio::time::sleep(Duration::from_millis(300)).await;

        sender.send(malformed("b")).await?;
        sender.send(malformed("c")).await?;
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Channel close triggers the final drain for anything unflushed.
        sender.send(malformed("d")).await?;
        sender.close();
        handle.await?;

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 3);

        let mut all: Vec<String> = batches
            .iter()
            .flat_map(|b| b.iter().map(|m| m.payload.clone()))
            .collect();
        all.sort();
        assert_eq!(all, vec!["a", "b", "c", "d"]);

        assert_eq!(PipelineMetrics::get(&metrics.dead_letters_flushed), 4);
        assert_eq!(PipelineMetrics::get(&metrics.dead_letter_batches), 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_no_flush_without_records() -> Result<()> {
        setup_log();

        let (sender, receiver) = async_channel::bounded::<MalformedRecord>(16);
        let sink = Arc::new(CollectingSink::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let handle = start_flusher(receiver, sink.clone(), metrics.clone());

        tokio::time::sleep(Duration::from_millis(250)).await;

        sender.close();
        handle.await?;

        assert!(sink.batches.lock().unwrap().is_empty());

        Ok(())
    }
}
