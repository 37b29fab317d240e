use std::sync::Arc;

use log::error;

use tonic::{Request, Response, Status};

use sluice_core::grpc_util::send_error_message;
use sluice_core::sluice::sluice_server::Sluice;
use sluice_core::sluice::{
    DrainRequest, DrainResponse, HeartbeatRequest, HeartbeatResponse, PublishRecordsRequest,
    PublishRecordsResponse, QueryStatsRequest, QueryStatsResponse, ReportProgressRequest,
    ReportProgressResponse,
};

use crate::pipeline::StreamPipeline;

/// Sluice server implementation.
///
/// The handler is a thin shell: every rpc delegates to the pipeline and
/// maps failures onto gRPC error replies. `publish` awaits the bounded
/// pipeline channels, so a slow sink slows the publisher down instead of
/// losing data.
pub struct SluiceServerImpl {
    pipeline: Arc<StreamPipeline>,
}

impl SluiceServerImpl {
    pub fn new(pipeline: Arc<StreamPipeline>) -> Self {
        Self { pipeline }
    }
}

#[tonic::async_trait]
impl Sluice for SluiceServerImpl {
    async fn heartbeat(
        &self,
        _request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        Ok(Response::new(HeartbeatResponse { acknowledged: true }))
    }

    async fn publish_records(
        &self,
        request: Request<PublishRecordsRequest>,
    ) -> Result<Response<PublishRecordsResponse>, Status> {
        let req = request.into_inner();

        match self.pipeline.publish(req.records).await {
            Ok(_) => {}
            Err(e) => {
                error!(
                    "publish records failed, feeder_id: {}, error: {}",
                    req.feeder_id, e
                );
                return send_error_message::<PublishRecordsResponse>(format!(
                    "publish records failed, feeder_id: {}, error: {}",
                    req.feeder_id, e
                ));
            }
        }

        Ok(Response::new(PublishRecordsResponse {
            success: true,
            error_message: "".to_string(),
        }))
    }

    async fn report_progress(
        &self,
        request: Request<ReportProgressRequest>,
    ) -> Result<Response<ReportProgressResponse>, Status> {
        let req = request.into_inner();

        match self.pipeline.report_progress(req.floor_ms).await {
            Ok(_) => {}
            Err(e) => {
                error!(
                    "report progress failed, feeder_id: {}, floor_ms: {}, error: {}",
                    req.feeder_id, req.floor_ms, e
                );
                return send_error_message::<ReportProgressResponse>(format!(
                    "report progress failed, feeder_id: {}, floor_ms: {}, error: {}",
                    req.feeder_id, req.floor_ms, e
                ));
            }
        }

        Ok(Response::new(ReportProgressResponse {
            success: true,
            error_message: "".to_string(),
        }))
    }

    async fn drain(
        &self,
        _request: Request<DrainRequest>,
    ) -> Result<Response<DrainResponse>, Status> {
        match self.pipeline.drain().await {
            Ok(_) => {}
            Err(e) => {
                error!("drain failed, error: {}", e);
                return send_error_message::<DrainResponse>(format!("drain failed, error: {}", e));
            }
        }

        Ok(Response::new(DrainResponse {
            success: true,
            error_message: "".to_string(),
        }))
    }

    async fn query_stats(
        &self,
        _request: Request<QueryStatsRequest>,
    ) -> Result<Response<QueryStatsResponse>, Status> {
        Ok(Response::new(self.pipeline.stats()))
    }
}
