//! Outbound gRPC gateways to the chat and user services.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::transport::Channel;

use chatr_common::{Error, Result};
use chatr_proto::{
    chat::{
        AddUserRequest, CreateChannelRequest, channel_service_client::ChannelServiceClient,
        user_service_client::UserServiceClient as ChatUserServiceClient,
    },
    user::{
        GetUserIdBySessionRequest, GetUserRequest, user_service_client::UserServiceClient,
    },
};
use chatr_transport::{CircuitBreaker, retry_call};

use crate::domain::User;

fn upstream_err(method: &str, status: tonic::Status) -> Error {
    Error::unavailable(method.to_string(), status)
}

// ── Chat service ────────────────────────────────────────────────────────────

#[async_trait]
pub trait ChannelGateway: Send + Sync {
    /// Returns `(channel_id, access_token)`.
    async fn create_channel(&self) -> Result<(u64, String)>;
    async fn add_user_to_channel(&self, channel_id: u64, user_id: u64) -> Result<()>;
}

pub struct GrpcChannelGateway {
    channels: ChannelServiceClient<Channel>,
    users: ChatUserServiceClient<Channel>,
    breaker: Arc<CircuitBreaker>,
}

impl GrpcChannelGateway {
    pub fn new(channel: Channel, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            channels: ChannelServiceClient::new(channel.clone()),
            users: ChatUserServiceClient::new(channel),
            breaker,
        }
    }
}

#[async_trait]
impl ChannelGateway for GrpcChannelGateway {
    async fn create_channel(&self) -> Result<(u64, String)> {
        let method = "chat.ChannelService/CreateChannel";
        let response = retry_call(&self.breaker, method, || {
            let mut client = self.channels.clone();
            async move { client.create_channel(CreateChannelRequest {}).await }
        })
        .await
        .map_err(|status| upstream_err(method, status))?
        .into_inner();
        Ok((response.channel_id, response.access_token))
    }

    async fn add_user_to_channel(&self, channel_id: u64, user_id: u64) -> Result<()> {
        let method = "chat.UserService/AddUserToChannel";
        retry_call(&self.breaker, method, || {
            let mut client = self.users.clone();
            async move {
                client
                    .add_user_to_channel(AddUserRequest {
                        channel_id,
                        user_id,
                    })
                    .await
            }
        })
        .await
        .map_err(|status| upstream_err(method, status))?;
        Ok(())
    }
}

// ── User service ────────────────────────────────────────────────────────────

#[async_trait]
pub trait UserGateway: Send + Sync {
    async fn get_user(&self, user_id: u64) -> Result<Option<User>>;
    /// Resolve a session cookie to a user id; `Ok(None)` when the session
    /// is unknown or expired.
    async fn get_user_id_by_session(&self, session_id: &str) -> Result<Option<u64>>;
}

pub struct GrpcUserGateway {
    client: UserServiceClient<Channel>,
    breaker: Arc<CircuitBreaker>,
}

impl GrpcUserGateway {
    pub fn new(channel: Channel, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            client: UserServiceClient::new(channel),
            breaker,
        }
    }
}

#[async_trait]
impl UserGateway for GrpcUserGateway {
    async fn get_user(&self, user_id: u64) -> Result<Option<User>> {
        let method = "user.UserService/GetUser";
        let response = retry_call(&self.breaker, method, || {
            let mut client = self.client.clone();
            async move { client.get_user(GetUserRequest { user_id }).await }
        })
        .await
        .map_err(|status| upstream_err(method, status))?
        .into_inner();

        if !response.exist {
            return Ok(None);
        }
        Ok(Some(User {
            id: response.id,
            name: response.name,
        }))
    }

    async fn get_user_id_by_session(&self, session_id: &str) -> Result<Option<u64>> {
        let method = "user.UserService/GetUserIdBySession";
        let result = retry_call(&self.breaker, method, || {
            let mut client = self.client.clone();
            let request = GetUserIdBySessionRequest {
                session_id: session_id.to_string(),
            };
            async move { client.get_user_id_by_session(request).await }
        })
        .await;

        match result {
            Ok(response) => Ok(Some(response.into_inner().user_id)),
            Err(status) if status.code() == tonic::Code::NotFound => Ok(None),
            Err(status) => Err(upstream_err(method, status)),
        }
    }
}
