//! Read-through caches over the wide-column repositories, plus the
//! Redis-only online-users set.
//!
//! The cache contract: writes go to the store first and then the cache, so
//! a cache entry never precedes its row; reads may serve data up to the
//! entry TTL stale.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use chatr_common::{Result, keys};
use chatr_infra::RedisPool;

use crate::storage::MembershipRepo;

const MEMBER_FLAG: &str = "1";

// ── Membership cache ────────────────────────────────────────────────────────

/// Decorates a [`MembershipRepo`] with the `rc:chanusers:<cid>` hash.
pub struct CachedMembershipRepo {
    inner: Arc<dyn MembershipRepo>,
    redis: Arc<RedisPool>,
}

impl CachedMembershipRepo {
    pub fn new(inner: Arc<dyn MembershipRepo>, redis: Arc<RedisPool>) -> Self {
        Self { inner, redis }
    }

    async fn backfill(&self, channel_id: u64, user_id: u64) {
        let key = keys::channel_key(keys::CHANNEL_USERS_KEY, channel_id);
        if let Err(e) = self.redis.hset(&key, &user_id.to_string(), MEMBER_FLAG).await {
            warn!(channel_id, user_id, error = %e, "membership cache backfill failed");
        }
    }
}

#[async_trait]
impl MembershipRepo for CachedMembershipRepo {
    async fn add_user_to_channel(&self, channel_id: u64, user_id: u64) -> Result<()> {
        self.inner.add_user_to_channel(channel_id, user_id).await?;
        let key = keys::channel_key(keys::CHANNEL_USERS_KEY, channel_id);
        self.redis
            .hset(&key, &user_id.to_string(), MEMBER_FLAG)
            .await?;
        Ok(())
    }

    async fn is_channel_member(&self, channel_id: u64, user_id: u64) -> Result<bool> {
        let key = keys::channel_key(keys::CHANNEL_USERS_KEY, channel_id);
        match self.redis.hexists(&key, &user_id.to_string()).await {
            Ok(true) => return Ok(true),
            Ok(false) => {},
            Err(e) => warn!(channel_id, error = %e, "membership cache read failed"),
        }
        let member = self.inner.is_channel_member(channel_id, user_id).await?;
        if member {
            self.backfill(channel_id, user_id).await;
        }
        Ok(member)
    }

    async fn channel_user_ids(&self, channel_id: u64) -> Result<Vec<u64>> {
        let key = keys::channel_key(keys::CHANNEL_USERS_KEY, channel_id);
        match self.redis.hkeys(&key).await {
            Ok(fields) if !fields.is_empty() => {
                let mut user_ids: Vec<u64> =
                    fields.iter().filter_map(|f| f.parse().ok()).collect();
                user_ids.sort_unstable();
                return Ok(user_ids);
            },
            Ok(_) => {},
            Err(e) => warn!(channel_id, error = %e, "membership cache read failed"),
        }
        let user_ids = self.inner.channel_user_ids(channel_id).await?;
        for user_id in &user_ids {
            self.backfill(channel_id, *user_id).await;
        }
        Ok(user_ids)
    }
}

// ── Online users ────────────────────────────────────────────────────────────

/// `rc:onlineusers:<cid>`: user is present iff at least one session for
/// `(channel, user)` is open somewhere.
#[async_trait]
pub trait OnlineUsersRepo: Send + Sync {
    async fn add_online_user(&self, channel_id: u64, user_id: u64) -> Result<()>;
    async fn delete_online_user(&self, channel_id: u64, user_id: u64) -> Result<()>;
    async fn online_user_ids(&self, channel_id: u64) -> Result<Vec<u64>>;
    async fn online_count(&self, channel_id: u64) -> Result<u64>;
    /// Drop the per-channel hashes when the channel is deleted.
    async fn evict_channel(&self, channel_id: u64) -> Result<()>;
}

/// Redis-backed online set. Entries carry the pool TTL so a crashed
/// instance's sessions eventually disappear.
pub struct RedisOnlineUsers {
    redis: Arc<RedisPool>,
}

impl RedisOnlineUsers {
    pub fn new(redis: Arc<RedisPool>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl OnlineUsersRepo for RedisOnlineUsers {
    async fn add_online_user(&self, channel_id: u64, user_id: u64) -> Result<()> {
        let key = keys::channel_key(keys::ONLINE_USERS_KEY, channel_id);
        self.redis
            .hset(&key, &user_id.to_string(), MEMBER_FLAG)
            .await?;
        Ok(())
    }

    async fn delete_online_user(&self, channel_id: u64, user_id: u64) -> Result<()> {
        let key = keys::channel_key(keys::ONLINE_USERS_KEY, channel_id);
        self.redis.hdel(&key, &user_id.to_string()).await?;
        Ok(())
    }

    async fn online_user_ids(&self, channel_id: u64) -> Result<Vec<u64>> {
        let key = keys::channel_key(keys::ONLINE_USERS_KEY, channel_id);
        let fields = self.redis.hkeys(&key).await?;
        Ok(fields.iter().filter_map(|f| f.parse().ok()).collect())
    }

    async fn online_count(&self, channel_id: u64) -> Result<u64> {
        let key = keys::channel_key(keys::ONLINE_USERS_KEY, channel_id);
        Ok(self.redis.hlen(&key).await?)
    }

    async fn evict_channel(&self, channel_id: u64) -> Result<()> {
        self.redis
            .del(&[
                keys::channel_key(keys::CHANNEL_USERS_KEY, channel_id),
                keys::channel_key(keys::ONLINE_USERS_KEY, channel_id),
            ])
            .await?;
        Ok(())
    }
}
