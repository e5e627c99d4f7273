//! gRPC surface: `forwarder.ForwarderService`.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use chatr_proto::forwarder::{
    RegisterChannelSessionRequest, RegisterChannelSessionResponse, RemoveChannelSessionRequest,
    RemoveChannelSessionResponse,
    forwarder_service_server::ForwarderService as ForwarderServiceProto,
};
use chatr_transport::{recover, to_status};

use crate::service::ForwarderService;

pub struct ForwarderGrpcService {
    service: Arc<dyn ForwarderService>,
}

impl ForwarderGrpcService {
    pub fn new(service: Arc<dyn ForwarderService>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl ForwarderServiceProto for ForwarderGrpcService {
    async fn register_channel_session(
        &self,
        request: Request<RegisterChannelSessionRequest>,
    ) -> Result<Response<RegisterChannelSessionResponse>, Status> {
        recover("forwarder.ForwarderService/RegisterChannelSession", async {
            let request = request.into_inner();
            self.service
                .register_channel_session(request.channel_id, request.user_id, &request.subscriber)
                .await
                .map_err(|e| to_status(&e))?;
            Ok(Response::new(RegisterChannelSessionResponse {}))
        })
        .await
    }

    async fn remove_channel_session(
        &self,
        request: Request<RemoveChannelSessionRequest>,
    ) -> Result<Response<RemoveChannelSessionResponse>, Status> {
        recover("forwarder.ForwarderService/RemoveChannelSession", async {
            let request = request.into_inner();
            self.service
                .remove_channel_session(request.channel_id, request.user_id)
                .await
                .map_err(|e| to_status(&e))?;
            Ok(Response::new(RemoveChannelSessionResponse {}))
        })
        .await
    }
}
