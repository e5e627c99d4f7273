use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use chatr_common::{Result, keys};
use chatr_infra::BrokerPublisher;

use crate::{clients::ChannelGateway, domain::MatchResult, repo::WaitListRepo};

#[async_trait]
pub trait MatchService: Send + Sync {
    /// One pop-or-push round for `user_id`. A match creates the channel and
    /// returns the full result; otherwise the caller is left waiting.
    async fn match_user(&self, user_id: u64) -> Result<MatchResult>;
    /// Publish a match result to the fan-out topic, keyed by user id.
    async fn broadcast_match_result(&self, result: &MatchResult) -> Result<()>;
    async fn remove_user_from_wait_list(&self, user_id: u64) -> Result<()>;
}

pub struct LiveMatchService {
    wait_list: Arc<dyn WaitListRepo>,
    channels: Arc<dyn ChannelGateway>,
    broker: Arc<dyn BrokerPublisher>,
}

impl LiveMatchService {
    pub fn new(
        wait_list: Arc<dyn WaitListRepo>,
        channels: Arc<dyn ChannelGateway>,
        broker: Arc<dyn BrokerPublisher>,
    ) -> Self {
        Self {
            wait_list,
            channels,
            broker,
        }
    }
}

#[async_trait]
impl MatchService for LiveMatchService {
    async fn match_user(&self, user_id: u64) -> Result<MatchResult> {
        let Some(peer_id) = self.wait_list.pop_or_push(user_id).await? else {
            return Ok(MatchResult::unmatched(user_id));
        };

        let (channel_id, access_token) = self.channels.create_channel().await?;
        info!(user_id, peer_id, channel_id, "matched");
        Ok(MatchResult {
            matched: true,
            user_id,
            peer_id,
            channel_id,
            access_token,
        })
    }

    async fn broadcast_match_result(&self, result: &MatchResult) -> Result<()> {
        self.broker
            .publish(
                keys::MATCH_TOPIC,
                &result.user_id.to_string(),
                &result.encode()?,
            )
            .await
    }

    async fn remove_user_from_wait_list(&self, user_id: u64) -> Result<()> {
        self.wait_list.remove(user_id).await
    }
}
