use anyhow::{bail, Result};
use log::{error, info};
use rand::Rng;
use std::time::Duration;

use sluice_core::error_bail;
use sluice_core::sluice::sluice_client::SluiceClient;
use sluice_core::sluice::{
    DrainRequest, PublishRecordsRequest, QueryStatsResponse, RawRecord, ReportProgressRequest,
    QueryStatsRequest,
};
use sluice_server::tool::{get_sluice_client, get_sluice_default_client};

/// Retries before a transport error is treated as fatal.
const MAX_RETRIES: usize = 5;

const RETRY_BASE_MS: u64 = 100;

/// Wrapper of grpc sluice client.
///
/// `Client` implements the publish side of the pipeline contract: record
/// batches, source progress signals, and the end-of-stream drain. Transient
/// transport errors are retried with capped exponential backoff; delivery is
/// at-least-once, the server side tolerates replays.
pub struct Client {
    sluice_client: SluiceClient<tonic::transport::Channel>,
}

impl Client {
    pub async fn new(server_endpoint: &String) -> Result<Self> {
        match get_sluice_client(server_endpoint).await {
            Ok(sluice_client) => Ok(Self { sluice_client }),
            Err(e) => {
                error_bail!(
                    "Failed to connect to sluice server, endpoint: {}, error: {}",
                    server_endpoint.clone(),
                    e
                );
            }
        }
    }

    pub async fn get_default_client() -> Result<Self> {
        match get_sluice_default_client().await {
            Ok(sluice_client) => Ok(Self { sluice_client }),
            Err(e) => {
                error_bail!("Failed to get default sluice client, error: {}", e);
            }
        }
    }

    fn backoff_ms(attempt: usize) -> u64 {
        RETRY_BASE_MS * (1u64 << attempt.min(6)) + rand::thread_rng().gen_range(0..=RETRY_BASE_MS)
    }

    /// Publish one batch of raw records.
    pub async fn publish(&mut self, feeder_id: u32, records: Vec<RawRecord>) -> Result<()> {
        let req = PublishRecordsRequest { feeder_id, records };

        for attempt in 0..MAX_RETRIES {
            match self.sluice_client.publish_records(req.clone()).await {
                Ok(res) => {
                    let resp = res.into_inner();

                    if resp.success {
                        return Ok(());
                    }

                    error_bail!(
                        "publish records rejected, feeder_id: {}, error: {}",
                        feeder_id,
                        resp.error_message
                    );
                }
                Err(e) => {
                    let backoff_ms = Self::backoff_ms(attempt);
                    error!(
                        "publish records failed, feeder_id: {}, attempt: {}, retry in {} ms, error: {}",
                        feeder_id, attempt, backoff_ms, e
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }

        error_bail!(
            "publish records failed after {} retries, feeder_id: {}",
            MAX_RETRIES,
            feeder_id
        );
    }

    /// Report that no record with event time below `floor_ms` will follow.
    pub async fn report_progress(&mut self, feeder_id: u32, floor_ms: i64) -> Result<()> {
        let req = ReportProgressRequest { feeder_id, floor_ms };

        for attempt in 0..MAX_RETRIES {
            match self.sluice_client.report_progress(req.clone()).await {
                Ok(res) => {
                    let resp = res.into_inner();

                    if resp.success {
                        return Ok(());
                    }

                    error_bail!(
                        "report progress rejected, feeder_id: {}, error: {}",
                        feeder_id,
                        resp.error_message
                    );
                }
                Err(e) => {
                    let backoff_ms = Self::backoff_ms(attempt);
                    error!(
                        "report progress failed, feeder_id: {}, attempt: {}, retry in {} ms, error: {}",
                        feeder_id, attempt, backoff_ms, e
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }

        error_bail!(
            "report progress failed after {} retries, feeder_id: {}",
            MAX_RETRIES,
            feeder_id
        );
    }

    /// Force every live window to fire and close.
    pub async fn drain(&mut self) -> Result<()> {
        match self.sluice_client.drain(DrainRequest {}).await {
            Ok(res) => {
                let resp = res.into_inner();

                if resp.success {
                    info!("drain acknowledged");
                    Ok(())
                } else {
                    error_bail!("drain rejected, error: {}", resp.error_message);
                }
            }
            Err(e) => {
                error_bail!("drain failed, error: {}", e);
            }
        }
    }

    pub async fn query_stats(&mut self) -> Result<QueryStatsResponse> {
        match self.sluice_client.query_stats(QueryStatsRequest {}).await {
            Ok(res) => Ok(res.into_inner()),
            Err(e) => {
                error_bail!("query stats failed, error: {}", e);
            }
        }
    }
}
