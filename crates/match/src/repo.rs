//! The wait-list: a sorted set scored by enqueue time.

use std::sync::Arc;

use async_trait::async_trait;
use redis::Script;

use chatr_common::{Error, Result, keys, now_ms};
use chatr_infra::RedisPool;

/// Pop-min-or-add as one server-side script, so two concurrent connects
/// cannot both pop the same entry or both enqueue without seeing each
/// other. Ties on score break lexicographically by member, which is
/// native sorted-set ordering. A self-pop (reconnect race) re-adds the
/// caller at its original score and reports no match.
const POP_OR_PUSH: &str = r"
local popped = redis.call('ZPOPMIN', KEYS[1])
if popped[1] == nil then
  redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
  return nil
end
if popped[1] == ARGV[1] then
  redis.call('ZADD', KEYS[1], popped[2], ARGV[1])
  return nil
end
return popped[1]
";

#[async_trait]
pub trait WaitListRepo: Send + Sync {
    /// Pop the longest-waiting peer, or enqueue the caller. `Ok(None)`
    /// means the caller is now waiting.
    async fn pop_or_push(&self, user_id: u64) -> Result<Option<u64>>;
    /// Best-effort removal; absent members are fine.
    async fn remove(&self, user_id: u64) -> Result<()>;
}

pub struct RedisWaitList {
    redis: Arc<RedisPool>,
    pop_or_push: Script,
}

impl RedisWaitList {
    #[must_use]
    pub fn new(redis: Arc<RedisPool>) -> Self {
        Self {
            redis,
            pop_or_push: Script::new(POP_OR_PUSH),
        }
    }
}

#[async_trait]
impl WaitListRepo for RedisWaitList {
    async fn pop_or_push(&self, user_id: u64) -> Result<Option<u64>> {
        let caller = user_id.to_string();
        let score = now_ms().to_string();
        let popped: Option<String> = self
            .redis
            .run_script(
                &self.pop_or_push,
                &[keys::USER_WAIT_LIST_KEY],
                &[&caller, &score],
            )
            .await?;
        popped.map(|peer| parse_peer(&peer)).transpose()
    }

    async fn remove(&self, user_id: u64) -> Result<()> {
        self.redis
            .zrem(keys::USER_WAIT_LIST_KEY, &user_id.to_string())
            .await?;
        Ok(())
    }
}

fn parse_peer(member: &str) -> Result<u64> {
    member
        .parse()
        .map_err(|_| Error::message(format!("wait-list member is not a user id: {member}")))
}
