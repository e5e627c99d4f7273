//! Outbound gRPC gateways to the user and forwarder services.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::transport::Channel;

use chatr_common::{Error, Result};
use chatr_proto::{
    forwarder::{
        RegisterChannelSessionRequest, RemoveChannelSessionRequest,
        forwarder_service_client::ForwarderServiceClient,
    },
    user::{GetUserRequest, user_service_client::UserServiceClient},
};
use chatr_transport::{CircuitBreaker, retry_call};

use crate::domain::User;

fn upstream_err(method: &str, status: tonic::Status) -> Error {
    Error::unavailable(method.to_string(), status)
}

// ── User service ────────────────────────────────────────────────────────────

#[async_trait]
pub trait UserGateway: Send + Sync {
    /// `Ok(None)` when the user does not exist.
    async fn get_user(&self, user_id: u64) -> Result<Option<User>>;
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
}

// ── Forwarder service ───────────────────────────────────────────────────────

#[async_trait]
pub trait ForwarderGateway: Send + Sync {
    async fn register_channel_session(
        &self,
        channel_id: u64,
        user_id: u64,
        subscriber: &str,
    ) -> Result<()>;
    async fn remove_channel_session(&self, channel_id: u64, user_id: u64) -> Result<()>;
}

pub struct GrpcForwarderGateway {
    client: ForwarderServiceClient<Channel>,
    breaker: Arc<CircuitBreaker>,
}

impl GrpcForwarderGateway {
    pub fn new(channel: Channel, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            client: ForwarderServiceClient::new(channel),
            breaker,
        }
    }
}

#[async_trait]
impl ForwarderGateway for GrpcForwarderGateway {
    async fn register_channel_session(
        &self,
        channel_id: u64,
        user_id: u64,
        subscriber: &str,
    ) -> Result<()> {
        let method = "forwarder.ForwarderService/RegisterChannelSession";
        retry_call(&self.breaker, method, || {
            let mut client = self.client.clone();
            let request = RegisterChannelSessionRequest {
                channel_id,
                user_id,
                subscriber: subscriber.to_string(),
            };
            async move { client.register_channel_session(request).await }
        })
        .await
        .map_err(|status| upstream_err(method, status))?;
        Ok(())
    }

    async fn remove_channel_session(&self, channel_id: u64, user_id: u64) -> Result<()> {
        let method = "forwarder.ForwarderService/RemoveChannelSession";
        retry_call(&self.breaker, method, || {
            let mut client = self.client.clone();
            let request = RemoveChannelSessionRequest {
                channel_id,
                user_id,
            };
            async move { client.remove_channel_session(request).await }
        })
        .await
        .map_err(|status| upstream_err(method, status))?;
        Ok(())
    }
}
