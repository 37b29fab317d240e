use anyhow::{anyhow, bail, Result};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use sluice_core::config::PipelineConfig;
use sluice_core::dead_letter::DeadLetterFlusher;
use sluice_core::emitter::PaneEmitter;
use sluice_core::error_bail;
use sluice_core::metrics::PipelineMetrics;
use sluice_core::record::{classify, Classified, MalformedRecord};
use sluice_core::sluice::{QueryStatsResponse, RawRecord};
use sluice_core::trigger::TriggerEvaluator;
use sluice_core::watermark::WatermarkTracker;
use sluice_core::window::WindowAssigner;

use crate::dead_letter_writer::DeadLetterWriter;
use crate::pane_writer::WindowTableWriter;

/// The assembled pipeline: classification, windowing/triggering, pane
/// emission, and the dead-letter path, glued to their sinks.
///
/// The two output graphs never touch: well-formed records flow through the
/// trigger evaluator into the windowed table, malformed records flow
/// through a bounded channel into the processing-time flusher. Both
/// channels are bounded, so a slow sink pushes back on the publisher
/// instead of dropping data.
pub struct StreamPipeline {
    config: PipelineConfig,

    metrics: Arc<PipelineMetrics>,

    watermark: Arc<WatermarkTracker>,

    evaluator: TriggerEvaluator,

    emitter: PaneEmitter<WindowTableWriter>,

    dead_letter_sender: async_channel::Sender<MalformedRecord>,
}

impl StreamPipeline {
    /// Build the pipeline and spawn its worker tasks. Must run inside a
    /// tokio runtime. Rejects invalid configuration before anything starts.
    pub fn start(config: PipelineConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let metrics = Arc::new(PipelineMetrics::new());
        let watermark = Arc::new(WatermarkTracker::new(config.allowed_skew_ms()));

        let evaluator = TriggerEvaluator::new(
            WindowAssigner::new(config.window_ms()),
            config.allowed_lateness_ms(),
            watermark.clone(),
            metrics.clone(),
        );

        let table_writer = Arc::new(WindowTableWriter::new(&config.table_dir)?);
        let emitter = PaneEmitter::new(
            table_writer,
            metrics.clone(),
            config.emitter_workers,
            config.channel_capacity,
            config.sink_max_retries,
            config.sink_retry_base_ms,
        );

        let (dead_letter_sender, dead_letter_receiver) =
            async_channel::bounded::<MalformedRecord>(config.channel_capacity);

        let dead_letter_writer = Arc::new(DeadLetterWriter::new(
            &config.dead_letter_dir,
            config.dead_letter_shards,
        )?);

        let flusher = DeadLetterFlusher::new(
            dead_letter_receiver,
            dead_letter_writer,
            config.dead_letter_flush_interval(),
            metrics.clone(),
        );

        tokio::spawn(async move {
            let _ = Toplevel::new(|s| async move {
                s.start(SubsystemBuilder::new("dead_letter_flusher", |s| {
                    flusher.run(s)
                }));
            })
            .catch_signals()
            .handle_shutdown_requests(Duration::from_millis(1000))
            .await;
        });

        info!(
            "pipeline started, window_secs: {}, allowed_lateness_days: {}, dead_letter_flush_secs: {}, emitter_workers: {}",
            config.window_secs,
            config.allowed_lateness_days,
            config.dead_letter_flush_secs,
            config.emitter_workers
        );

        Ok(Arc::new(Self {
            config,
            metrics,
            watermark,
            evaluator,
            emitter,
            dead_letter_sender,
        }))
    }

    /// Ingest one published batch.
    ///
    /// Classification splits the batch; malformed records go to the
    /// dead-letter channel, parsed records to the trigger evaluator. The
    /// batch minimum then drives the watermark, and any windows it newly
    /// completed fire in the same call.
    pub async fn publish(&self, records: Vec<RawRecord>) -> Result<()> {
        let mut parsed = Vec::with_capacity(records.len());
        let mut min_event_time_ms = i64::MAX;

        for raw in &records {
            match classify(raw) {
                Classified::Parsed(record) => {
                    PipelineMetrics::inc(&self.metrics.records_parsed);

                    min_event_time_ms = min_event_time_ms.min(record.event_time_ms);
                    parsed.push(record);
                }
                Classified::Malformed(record) => {
                    PipelineMetrics::inc(&self.metrics.records_malformed);

                    self.dead_letter_sender.send(record).await.map_err(|_| {
                        anyhow!("send malformed record to dead letter flusher failed")
                    })?;
                }
            }
        }

        if parsed.is_empty() {
            return Ok(());
        }

        for pane in self.evaluator.on_batch(parsed) {
            self.emitter.dispatch(pane).await?;
        }

        self.watermark.observe_batch(min_event_time_ms);

        for pane in self.evaluator.on_watermark() {
            self.emitter.dispatch(pane).await?;
        }

        Ok(())
    }

    /// Apply a source progress signal and fire whatever it completed.
    pub async fn report_progress(&self, floor_ms: i64) -> Result<()> {
        self.watermark.advance_floor(floor_ms);

        for pane in self.evaluator.on_watermark() {
            self.emitter.dispatch(pane).await?;
        }

        self.metrics
            .log_summary(self.evaluator.pending_windows(), self.watermark.current());

        Ok(())
    }

    /// Advance the watermark to infinity: every live window fires and
    /// closes. The dead-letter buffer keeps its own cadence and flushes
    /// within one interval.
    pub async fn drain(&self) -> Result<()> {
        info!("drain requested, advancing watermark to infinity");

        for pane in self.evaluator.drain() {
            self.emitter.dispatch(pane).await?;
        }

        Ok(())
    }

    /// Full shutdown: drain the windows, close both output channels, and
    /// wait until every queued pane has reached the sink.
    pub async fn shutdown(&self) -> Result<()> {
        self.drain().await?;

        self.emitter.close();
        self.dead_letter_sender.close();

        while !self.emitter.is_workers_done() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if self.emitter.is_failed() {
            error_bail!("pane emitter worker failed during shutdown");
        }

        self.metrics
            .log_summary(self.evaluator.pending_windows(), self.watermark.current());

        info!("pipeline shutdown complete, panes emitted: {}", self.emitter.total_emitted());

        Ok(())
    }

    pub fn stats(&self) -> QueryStatsResponse {
        QueryStatsResponse {
            records_parsed: PipelineMetrics::get(&self.metrics.records_parsed),
            records_malformed: PipelineMetrics::get(&self.metrics.records_malformed),
            records_dropped_late: PipelineMetrics::get(&self.metrics.records_dropped_late),
            panes_emitted: PipelineMetrics::get(&self.metrics.panes_emitted),
            late_firings: PipelineMetrics::get(&self.metrics.late_firings),
            dead_letters_flushed: PipelineMetrics::get(&self.metrics.dead_letters_flushed),
            dead_letter_batches: PipelineMetrics::get(&self.metrics.dead_letter_batches),
            pending_windows: self.evaluator.pending_windows() as u64,
            watermark_ms: self.watermark.current(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
