//! Match-result fan-out: every match instance consumes the result topic
//! and delivers the access token to whichever of the two users are
//! connected here, adding them to the channel's membership first.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use chatr_infra::{Delivery, MessageHandler};

use crate::{clients::ChannelGateway, domain::MatchResult, http::MatchSessionRegistry};

pub struct MatchResultHandler {
    registry: Arc<MatchSessionRegistry>,
    channels: Arc<dyn ChannelGateway>,
}

impl MatchResultHandler {
    pub fn new(registry: Arc<MatchSessionRegistry>, channels: Arc<dyn ChannelGateway>) -> Self {
        Self { registry, channels }
    }
}

#[async_trait]
impl MessageHandler for MatchResultHandler {
    async fn handle(&self, delivery: Delivery) -> chatr_common::Result<()> {
        let result = MatchResult::decode(&delivery.payload)?;
        let frame = serde_json::to_string(&result.to_presenter())
            .map_err(|e| chatr_common::Error::message(format!("encode match result: {e}")))?;

        for target in [result.user_id, result.peer_id] {
            if !self.registry.is_connected(target).await {
                continue;
            }
            // Membership must exist before the client can use the token.
            if let Err(e) = self
                .channels
                .add_user_to_channel(result.channel_id, target)
                .await
            {
                warn!(
                    user_id = target,
                    channel_id = result.channel_id,
                    error = %e,
                    "match: membership insert failed, withholding token"
                );
                continue;
            }
            self.registry.send_to_user(target, &frame).await;
        }
        Ok(())
    }
}
