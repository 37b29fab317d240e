use anyhow::{anyhow, bail, Result};
use log::{error, info};
use rand::Rng;
use std::hash::Hasher;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use sync_unsafe_cell::SyncUnsafeCell;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

use fnv::FnvHasher;

use crate::error_bail;
use crate::metrics::PipelineMetrics;
use crate::window::{Pane, WindowKey};

/// Destination of emitted panes.
///
/// `write_pane` must only return `Ok` once the pane is durably accepted:
/// the emitter counts a pane as delivered at that point and will not offer
/// it again. Repeated delivery of the same window key with updated contents
/// is part of the contract (accumulating panes), so implementations must
/// upsert, not append.
#[tonic::async_trait]
pub trait PaneSink: Send + Sync + 'static {
    async fn write_pane(&self, pane: &Pane) -> Result<()>;
}

#[derive(Default, Debug, Clone, Eq, PartialEq)]
enum WorkerState {
    #[default]
    Running,
    Failed,
    Success,
}

#[derive(Default)]
pub struct WorkerInfo {
    worker_id: u32,
    total: u64,
    worker_state: WorkerState,
}

unsafe impl Send for WorkerInfo {}
unsafe impl Sync for WorkerInfo {}

/// Fans panes out to a fixed pool of sink workers.
///
/// Routing hashes the window key, so every firing of one window lands on
/// the same worker and reaches the sink in firing order. The channels are
/// bounded: when the sink cannot keep up, `dispatch` blocks the trigger
/// path instead of dropping panes.
pub struct PaneEmitter<S: PaneSink> {
    senders: Vec<async_channel::Sender<Pane>>,

    /// For performance, worker state is accessed through `SyncUnsafeCell`
    /// directly. Each slot is written by its single owning worker.
    worker_infos: Vec<Arc<SyncUnsafeCell<WorkerInfo>>>,

    _marker: PhantomData<S>,
}

impl<S: PaneSink> PaneEmitter<S> {
    pub fn new(
        sink: Arc<S>,
        metrics: Arc<PipelineMetrics>,
        worker_num: usize,
        channel_capacity: usize,
        max_retries: usize,
        retry_base_ms: u64,
    ) -> Self {
        let worker_num = worker_num.max(1);

        let mut senders = Vec::with_capacity(worker_num);
        let mut worker_infos = Vec::with_capacity(worker_num);

        for i in 0..worker_num {
            let (sender, receiver) = async_channel::bounded::<Pane>(channel_capacity);
            senders.push(sender);

            let worker_info = Arc::new(SyncUnsafeCell::new(WorkerInfo {
                worker_id: i as u32,
                ..WorkerInfo::default()
            }));
            worker_infos.push(worker_info.clone());

            info!("start pane emitter worker {}", i);

            let worker = EmitterWorker::new(
                i as u32,
                receiver,
                sink.clone(),
                metrics.clone(),
                worker_info,
                max_retries,
                retry_base_ms,
            );

            let worker_name = format!("pane_emitter_worker_{}", i);

            tokio::spawn(async move {
                let _ = Toplevel::new(|s| async move {
                    s.start(SubsystemBuilder::new(worker_name, |s| async move {
                        worker.run(s).await
                    }));
                })
                .catch_signals()
                .handle_shutdown_requests(Duration::from_millis(1000))
                .await;
            });
        }

        Self {
            senders,
            worker_infos,
            _marker: PhantomData,
        }
    }

    fn worker_index(window: &WindowKey, worker_num: usize) -> usize {
        let mut hasher = FnvHasher::default();
        hasher.write_i64(window.start_ms);
        hasher.write_i64(window.end_ms);
        (hasher.finish() % worker_num as u64) as usize
    }

    /// Hand one pane to its worker. Blocks when the worker's channel is
    /// full, which is the backpressure path.
    pub async fn dispatch(&self, pane: Pane) -> Result<()> {
        let index = Self::worker_index(&pane.window, self.senders.len());

        self.senders[index]
            .send(pane)
            .await
            .map_err(|_| anyhow!("send pane to emitter worker failed, worker: {}", index))
    }

    /// Close the input channels. Workers drain what is queued and finish.
    pub fn close(&self) {
        for sender in &self.senders {
            sender.close();
        }
    }

    pub fn is_workers_done(&self) -> bool {
        self.worker_infos.iter().all(|x| {
            let worker_info = unsafe { &*x.get() };
            worker_info.worker_state != WorkerState::Running
        })
    }

    pub fn is_failed(&self) -> bool {
        self.worker_infos.iter().any(|x| {
            let worker_info = unsafe { &*x.get() };
            worker_info.worker_state == WorkerState::Failed
        })
    }

    pub fn total_emitted(&self) -> u64 {
        self.worker_infos
            .iter()
            .map(|x| unsafe {
                let worker_info = &*x.get();
                worker_info.total
            })
            .sum()
    }
}

pub struct EmitterWorker<S: PaneSink> {
    worker_id: u32,

    receiver: async_channel::Receiver<Pane>,

    sink: Arc<S>,

    metrics: Arc<PipelineMetrics>,

    worker_info: Arc<SyncUnsafeCell<WorkerInfo>>,

    /// Retries before a sink write failure becomes a worker failure.
    max_retries: usize,

    retry_base_ms: u64,
}

impl<S: PaneSink> EmitterWorker<S> {
    pub fn new(
        worker_id: u32,
        receiver: async_channel::Receiver<Pane>,
        sink: Arc<S>,
        metrics: Arc<PipelineMetrics>,
        worker_info: Arc<SyncUnsafeCell<WorkerInfo>>,
        max_retries: usize,
        retry_base_ms: u64,
    ) -> Self {
        Self {
            worker_id,
            receiver,
            sink,
            metrics,
            worker_info,
            max_retries,
            retry_base_ms,
        }
    }

    fn set_worker_state(&self, state: WorkerState) {
        let worker_info = unsafe { &mut *self.worker_info.get() };
        worker_info.worker_state = state;
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<()> {
        loop {
            tokio::select! {
                pane = self.receiver.recv() => {
                    match pane {
                        Ok(pane) => {
                            if let Err(e) = self.write_with_retry(&pane).await {
                                self.set_worker_state(WorkerState::Failed);
                                return Err(e);
                            }
                        }
                        Err(_) => {
                            info!("pane channel closed, emitter worker done, worker_id: {}", self.worker_id);
                            self.set_worker_state(WorkerState::Success);
                            break;
                        }
                    }
                },
                _ = subsys.on_shutdown_requested() => {
                    info!("pane emitter worker shutdown, worker_id: {}", self.worker_id);

                    // Queued panes are still written out; a pane is never
                    // dropped between trigger and sink.
                    while let Ok(pane) = self.receiver.try_recv() {
                        if let Err(e) = self.write_with_retry(&pane).await {
                            self.set_worker_state(WorkerState::Failed);
                            return Err(e);
                        }
                    }

                    self.set_worker_state(WorkerState::Success);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Write one pane, retrying transient sink failures with capped
    /// exponential backoff plus jitter.
    async fn write_with_retry(&self, pane: &Pane) -> Result<()> {
        let mut attempt: usize = 0;

        loop {
            match self.sink.write_pane(pane).await {
                Ok(_) => {
                    PipelineMetrics::inc(&self.metrics.panes_emitted);

                    let worker_info = unsafe { &mut *self.worker_info.get() };
                    worker_info.total += 1;

                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;

                    if attempt > self.max_retries {
                        error_bail!(
                            "write pane failed after {} retries, window: {}, worker_id: {}, error: {}",
                            self.max_retries,
                            pane.window.to_string(),
                            self.worker_id,
                            e
                        );
                    }

                    let backoff_ms = self.retry_base_ms * (1u64 << attempt.min(6))
                        + rand::thread_rng().gen_range(0..=self.retry_base_ms.max(1));

                    error!(
                        "write pane failed, window: {}, attempt: {}, retry in {} ms, error: {}",
                        pane.window.to_string(),
                        attempt,
                        backoff_ms,
                        e
                    );

                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }
}
