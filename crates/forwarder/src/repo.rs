//! The per-channel subscriber registry: `rc:forward:<cid>` maps user id →
//! the subscriber id of the chat instance holding that user's session.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;

use chatr_common::{Result, keys};
use chatr_infra::RedisPool;

#[async_trait]
pub trait SubscriberRepo: Send + Sync {
    async fn register_channel_session(
        &self,
        channel_id: u64,
        user_id: u64,
        subscriber: &str,
    ) -> Result<()>;
    async fn remove_channel_session(&self, channel_id: u64, user_id: u64) -> Result<()>;
    /// The distinct subscriber ids currently holding sessions for the
    /// channel. Two users on the same instance yield one entry.
    async fn subscribers(&self, channel_id: u64) -> Result<HashSet<String>>;
}

pub struct RedisSubscriberRepo {
    redis: Arc<RedisPool>,
}

impl RedisSubscriberRepo {
    #[must_use]
    pub fn new(redis: Arc<RedisPool>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl SubscriberRepo for RedisSubscriberRepo {
    async fn register_channel_session(
        &self,
        channel_id: u64,
        user_id: u64,
        subscriber: &str,
    ) -> Result<()> {
        let key = keys::channel_key(keys::FORWARD_KEY, channel_id);
        self.redis
            .hset(&key, &user_id.to_string(), subscriber)
            .await?;
        Ok(())
    }

    async fn remove_channel_session(&self, channel_id: u64, user_id: u64) -> Result<()> {
        let key = keys::channel_key(keys::FORWARD_KEY, channel_id);
        self.redis.hdel(&key, &user_id.to_string()).await?;
        Ok(())
    }

    async fn subscribers(&self, channel_id: u64) -> Result<HashSet<String>> {
        let key = keys::channel_key(keys::FORWARD_KEY, channel_id);
        let entries = self.redis.hgetall(&key).await?;
        Ok(entries.into_values().collect())
    }
}
