//! gRPC surface: `chat.ChannelService` and `chat.UserService`.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use chatr_proto::chat::{
    AddUserRequest, AddUserResponse, CreateChannelRequest, CreateChannelResponse,
    channel_service_server::ChannelService as ChannelServiceProto,
    user_service_server::UserService as UserServiceProto,
};
use chatr_transport::{recover, to_status};

use crate::service::{ChannelService, UserService};

pub struct ChatGrpcService {
    channels: Arc<dyn ChannelService>,
    users: Arc<dyn UserService>,
}

impl ChatGrpcService {
    pub fn new(channels: Arc<dyn ChannelService>, users: Arc<dyn UserService>) -> Self {
        Self { channels, users }
    }
}

#[tonic::async_trait]
impl ChannelServiceProto for ChatGrpcService {
    async fn create_channel(
        &self,
        _request: Request<CreateChannelRequest>,
    ) -> Result<Response<CreateChannelResponse>, Status> {
        recover("chat.ChannelService/CreateChannel", async {
            let channel = self
                .channels
                .create_channel()
                .await
                .map_err(|e| to_status(&e))?;
            Ok(Response::new(CreateChannelResponse {
                channel_id: channel.id,
                access_token: channel.access_token,
            }))
        })
        .await
    }
}

#[tonic::async_trait]
impl UserServiceProto for ChatGrpcService {
    async fn add_user_to_channel(
        &self,
        request: Request<AddUserRequest>,
    ) -> Result<Response<AddUserResponse>, Status> {
        recover("chat.UserService/AddUserToChannel", async {
            let request = request.into_inner();
            self.users
                .add_user_to_channel(request.channel_id, request.user_id)
                .await
                .map_err(|e| to_status(&e))?;
            Ok(Response::new(AddUserResponse {}))
        })
        .await
    }
}
